//! Services hosted by `muxcall serve`.

use muxcall_rpc::{MethodSet, Server, Service};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Args {
    pub a: i64,
    pub b: i64,
}

/// Integer arithmetic.
#[derive(Debug, Default)]
pub struct Arith;

impl Arith {
    fn add(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        *reply = args.a.checked_add(args.b).ok_or("overflow")?;
        Ok(())
    }

    fn sub(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        *reply = args.a.checked_sub(args.b).ok_or("overflow")?;
        Ok(())
    }

    fn mul(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        *reply = args.a.checked_mul(args.b).ok_or("overflow")?;
        Ok(())
    }

    fn div(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        if args.b == 0 {
            return Err("divide by zero".to_string());
        }
        *reply = args.a.checked_div(args.b).ok_or("overflow")?;
        Ok(())
    }
}

impl Service for Arith {
    fn methods(methods: &mut MethodSet<Self>) {
        methods
            .add("Add_", Arith::add)
            .add("Sub_", Arith::sub)
            .add("Mul_", Arith::mul)
            .add("Div_", Arith::div);
    }
}

/// Replies with whatever it is sent.
#[derive(Debug, Default)]
pub struct Echo;

impl Echo {
    fn echo(
        &self,
        arg: serde_json::Value,
        reply: &mut serde_json::Value,
    ) -> Result<(), String> {
        *reply = arg;
        Ok(())
    }
}

impl Service for Echo {
    fn methods(methods: &mut MethodSet<Self>) {
        methods.add("Echo_", Echo::echo);
    }
}

pub fn register(server: &Server) -> muxcall_rpc::Result<()> {
    server.register(Arith)?;
    server.register(Echo)?;
    Ok(())
}
