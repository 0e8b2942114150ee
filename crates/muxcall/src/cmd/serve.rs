use muxcall_frame::FrameConfig;
use muxcall_rpc::{Server, ServerConfig};
use muxcall_transport::TcpTransport;
use tracing::info;

use crate::cmd::{runtime, ServeArgs};
use crate::demo;
use crate::exit::{rpc_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, ListeningOutput, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    runtime()?.block_on(serve(args, format))
}

async fn serve(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ServerConfig::default()
        .with_frame_config(FrameConfig::default().with_max_payload_size(args.max_payload))
        .with_http_config(args.conn.http_config());
    let server = Server::with_config(config);
    demo::register(&server).map_err(|err| rpc_error("register failed", &err))?;

    let transport = TcpTransport::bind(&args.addr)
        .await
        .map_err(|err| transport_error("bind failed", &err))?;
    let services = server.services();
    print_listening(
        &ListeningOutput {
            event: "listening",
            addr: transport.local_addr().to_string(),
            transport: args.conn.transport_name(),
            codec: args.conn.codec.as_str(),
            services: &services,
        },
        format,
    );

    let codec = args.conn.codec;
    let http = args.conn.http;
    let mut serving = tokio::spawn({
        let server = server.clone();
        async move {
            if http {
                server.serve_http(transport, codec).await
            } else {
                server.accept(transport, codec).await
            }
        }
    });

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => signal
            .map(|()| info!("interrupted, shutting down"))
            .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))),
        joined = &mut serving => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(rpc_error("accept failed", &err)),
            Err(err) => Err(CliError::new(INTERNAL, format!("accept loop ended abnormally: {err}"))),
        },
    };

    server.shutdown().await;
    outcome.map(|()| SUCCESS)
}
