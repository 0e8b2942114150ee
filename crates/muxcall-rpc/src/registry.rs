//! Service registration and method dispatch.
//!
//! A service is any type implementing [`Service`]. At registration time its
//! [`Service::methods`] hook lists candidate methods on a [`MethodSet`], and
//! only the ones meeting the admission contract become remotely callable:
//!
//! - the name is exported (starts with an uppercase letter) and ends with
//!   [`METHOD_SUFFIX`];
//! - the method takes the receiver, one argument and a `&mut` reply, and
//!   returns `Result<(), E>` with a displayable error.
//!
//! The signature rules are enforced by the types [`MethodSet::add`] accepts;
//! the naming rules are checked at registration and offending methods are
//! skipped with a warning.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use muxcall_frame::{decode_value, encode_value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, RpcError};

/// Suffix that marks a method as remotely callable.
pub const METHOD_SUFFIX: &str = "_";

/// A type whose methods can be served over RPC.
pub trait Service: Send + Sync + Sized + 'static {
    /// List the methods to expose.
    fn methods(methods: &mut MethodSet<Self>);
}

/// An argument decoded for a specific method, ready to be invoked.
pub struct DecodedArg(Box<dyn Any + Send>);

impl fmt::Debug for DecodedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecodedArg")
    }
}

type Receiver = dyn Any + Send + Sync;
type DecodeFn = dyn Fn(&[u8]) -> Result<DecodedArg> + Send + Sync;
type InvokeFn = dyn Fn(&Receiver, DecodedArg) -> Result<Bytes> + Send + Sync;

/// A callable method and its metadata.
pub struct MethodDescriptor {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    decode: Box<DecodeFn>,
    invoke: Box<InvokeFn>,
    invocations: Mutex<u64>,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Number of times the method has been invoked.
    pub fn invocations(&self) -> u64 {
        *self.invocations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_invocation(&self) {
        *self.invocations.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .field("invocations", &self.invocations())
            .finish()
    }
}

/// Collects the methods a [`Service`] exposes.
pub struct MethodSet<S> {
    service: String,
    methods: HashMap<String, MethodDescriptor>,
    _receiver: std::marker::PhantomData<fn(&S)>,
}

impl<S: Service> MethodSet<S> {
    fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            methods: HashMap::new(),
            _receiver: std::marker::PhantomData,
        }
    }

    /// Offer `method` under `name`.
    ///
    /// The reply starts from `R::default()` and is encoded after the method
    /// returns `Ok`. An `Err` is passed to the caller as an application error.
    pub fn add<A, R, E, F>(&mut self, name: &str, method: F) -> &mut Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + 'static,
        E: fmt::Display,
        F: Fn(&S, A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
    {
        if let Err(reason) = check_method_name(name) {
            warn!(service = %self.service, method = name, reason, "method skipped");
            return self;
        }
        if self.methods.contains_key(name) {
            warn!(service = %self.service, method = name, "duplicate method skipped");
            return self;
        }

        let decode = Box::new(|body: &[u8]| {
            decode_value::<A>(body)
                .map(|arg| DecodedArg(Box::new(arg)))
                .map_err(|err| RpcError::Failure(format!("rpc: decoding argument: {err}")))
        });

        let service = self.service.clone();
        let method_name = name.to_string();
        let invoke = Box::new(move |receiver: &Receiver, arg: DecodedArg| {
            let mismatch = || {
                RpcError::Failure(format!(
                    "rpc: internal type mismatch calling {service}.{method_name}"
                ))
            };
            let receiver = receiver.downcast_ref::<S>().ok_or_else(mismatch)?;
            let arg = arg.0.downcast::<A>().map_err(|_| mismatch())?;
            let mut reply = R::default();
            method(receiver, *arg, &mut reply)
                .map_err(|err| RpcError::Application(err.to_string()))?;
            encode_value(&reply).map_err(|err| RpcError::Failure(format!("rpc: encoding reply: {err}")))
        });

        self.methods.insert(
            name.to_string(),
            MethodDescriptor {
                name: name.to_string(),
                arg_type: type_name::<A>(),
                reply_type: type_name::<R>(),
                decode,
                invoke,
                invocations: Mutex::new(0),
            },
        );
        self
    }
}

/// A registered service: its receiver and method table.
pub struct ServiceDescriptor {
    name: String,
    type_name: &'static str,
    receiver: Arc<Receiver>,
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Build the descriptor for `receiver`.
    ///
    /// Without an explicit `name` the service is named after its type, which
    /// must then be exported.
    pub fn new<S: Service>(receiver: S, name: Option<&str>) -> Result<Self> {
        let type_name = short_type_name::<S>();
        let name = match name {
            Some(name) => {
                if name.is_empty() || name.contains('.') {
                    return Err(RpcError::Register(format!(
                        "rpc.Register: invalid service name {name:?} for type {type_name}"
                    )));
                }
                name
            }
            None => {
                if !is_exported(type_name) {
                    return Err(RpcError::Register(format!(
                        "rpc.Register: type {type_name} is not exported"
                    )));
                }
                type_name
            }
        };

        let mut set = MethodSet::<S>::new(name);
        S::methods(&mut set);
        if set.methods.is_empty() {
            return Err(RpcError::Register(format!(
                "rpc.Register: type {name} has no exported methods of suitable type"
            )));
        }

        debug!(service = name, methods = set.methods.len(), "service described");
        Ok(Self {
            name: name.to_string(),
            type_name,
            receiver: Arc::new(receiver),
            methods: set.methods,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn method(&self, method: &str) -> Option<&MethodDescriptor> {
        self.methods.get(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    /// Decode a request body into the argument type of `method`.
    pub fn decode_arg(&self, method: &str, body: &[u8]) -> Result<DecodedArg> {
        let descriptor = self.lookup(method)?;
        (descriptor.decode)(body)
    }

    /// Invoke `method` with an argument produced by [`decode_arg`](Self::decode_arg).
    ///
    /// Returns the encoded reply, an [`RpcError::Application`] if the method
    /// failed, or an [`RpcError::Failure`] if it could not be called.
    pub fn call(&self, method: &str, arg: DecodedArg) -> Result<Bytes> {
        let descriptor = self.lookup(method)?;
        descriptor.record_invocation();
        (descriptor.invoke)(self.receiver.as_ref(), arg)
    }

    /// Snapshot of the service for display.
    pub fn info(&self) -> ServiceInfo {
        let mut methods: Vec<MethodInfo> = self
            .methods
            .values()
            .map(|method| MethodInfo {
                name: method.name.clone(),
                arg_type: method.arg_type.to_string(),
                reply_type: method.reply_type.to_string(),
                invocations: method.invocations(),
            })
            .collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        ServiceInfo {
            name: self.name.clone(),
            type_name: self.type_name.to_string(),
            methods,
        }
    }

    fn lookup(&self, method: &str) -> Result<&MethodDescriptor> {
        self.methods.get(method).ok_or_else(|| {
            RpcError::Failure(format!("rpc: can't find method {}.{method}", self.name))
        })
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("methods", &self.methods.keys())
            .finish()
    }
}

/// Registered service as reported by [`Server::services`](crate::Server::services).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub type_name: String,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub arg_type: String,
    pub reply_type: String,
    pub invocations: u64,
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn check_method_name(name: &str) -> std::result::Result<(), &'static str> {
    if !is_exported(name) {
        return Err("method is not exported");
    }
    if name.len() == METHOD_SUFFIX.len() || !name.ends_with(METHOD_SUFFIX) {
        return Err("method name lacks the rpc suffix");
    }
    Ok(())
}

/// Last path segment of a type name, without generic parameters.
fn short_type_name<S>() -> &'static str {
    let full = type_name::<S>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
