use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use muxcall_rpc::{ServiceInfo, StateEvent};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct ListeningOutput<'a> {
    pub event: &'static str,
    pub addr: String,
    pub transport: &'static str,
    pub codec: &'static str,
    pub services: &'a [ServiceInfo],
}

pub fn print_listening(out: &ListeningOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            println!(
                "listening on {} ({}, {} codec)",
                out.addr, out.transport, out.codec
            );
            let mut table = new_table(vec!["SERVICE", "METHOD", "ARGUMENT", "REPLY"]);
            for service in out.services {
                for method in &service.methods {
                    table.add_row(vec![
                        service.name.clone(),
                        method.name.clone(),
                        method.arg_type.clone(),
                        method.reply_type.clone(),
                    ]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "listening addr={} transport={} codec={}",
                out.addr, out.transport, out.codec
            );
            for service in out.services {
                let methods: Vec<&str> = service.methods.iter().map(|m| m.name.as_str()).collect();
                println!("  {} [{}]", service.name, methods.join(", "));
            }
        }
    }
}

#[derive(Serialize)]
pub struct ReplyOutput<'a> {
    pub service_method: &'a str,
    pub request_id: Option<u64>,
    pub elapsed_ms: f64,
    pub reply: &'a serde_json::Value,
}

pub fn print_reply(out: &ReplyOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["METHOD", "REQUEST", "ELAPSED MS", "REPLY"]);
            table.add_row(vec![
                out.service_method.to_string(),
                request_id_text(out.request_id),
                format!("{:.2}", out.elapsed_ms),
                out.reply.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match serde_json::to_string_pretty(out.reply) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{}", out.reply),
        },
    }
}

#[derive(Serialize)]
struct StateOutput<'a> {
    state: &'static str,
    remote_addr: &'a str,
    error: Option<String>,
    timestamp: String,
}

pub fn print_event(event: &StateEvent, format: OutputFormat) {
    let out = StateOutput {
        state: event.state.as_str(),
        remote_addr: &event.remote_addr,
        error: event.error.as_ref().map(ToString::to_string),
        timestamp: now_unix_seconds(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["TIME", "STATE", "REMOTE", "ERROR"]);
            table.add_row(vec![
                out.timestamp.clone(),
                out.state.to_string(),
                out.remote_addr.to_string(),
                out.error.clone().unwrap_or_default(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match &out.error {
            Some(error) => println!("{} {} error={}", out.state, out.remote_addr, error),
            None => println!("{} {}", out.state, out.remote_addr),
        },
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn request_id_text(request_id: Option<u64>) -> String {
    request_id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
