// ABOUTME: The runtime table of callable handles keyed by IDL name, standing in
// ABOUTME: for `original_source/service.go`'s reflect.Value-backed MethodDesc/Service.

use crate::codec::StreamKind;
use crate::error::{RegisterError, RequestError};
use crate::request::{ArgValue, RetValue};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, RwLock};

/// The type an argument position expects, used both for arity/type checking
/// and to tell `ArgReader` how to decode the frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSpec {
    Normal(&'static str),
    Message(String),
    Stream(StreamKind),
}

/// The type a method's return position produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetSpec {
    Normal(&'static str),
    Message(String),
    Stream(StreamKind),
    NoReturn,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<RetValue, RequestError>> + Send>>;

/// A boxed async method body. Rust has no `reflect.Value` to call into
/// generically, so registration captures a closure instead, supplied by the
/// caller of `ServiceBuilder::method` below.
pub type HandlerFn = Arc<dyn Fn(Vec<ArgValue>) -> HandlerFuture + Send + Sync>;

pub struct MethodDesc {
    pub name: String,
    pub args: Vec<ArgSpec>,
    pub ret: RetSpec,
    pub handler: HandlerFn,
}

impl std::fmt::Debug for MethodDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDesc")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("ret", &self.ret)
            .finish()
    }
}

#[derive(Debug)]
pub struct Service {
    pub name: String,
    pub methods: HashMap<String, MethodDesc>,
}

impl Service {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
        }
    }
}

pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, MethodDesc>,
}

impl ServiceBuilder {
    /// Register one method. Fails if `args` declares more than one stream
    /// argument (spec §4.3: a request may carry at most one streaming arg,
    /// mirrored from the client-side `errClientMultipleStream` check, applied
    /// here at registration time instead of per-call).
    pub fn method(
        mut self,
        name: impl Into<String>,
        args: Vec<ArgSpec>,
        ret: RetSpec,
        handler: HandlerFn,
    ) -> Result<Self, RegisterError> {
        let name = name.into();
        let stream_args = args.iter().filter(|a| matches!(a, ArgSpec::Stream(_))).count();
        if stream_args > 1 {
            return Err(RegisterError::MultipleStreamArgs(name));
        }
        self.methods.insert(
            name.clone(),
            MethodDesc { name, args, ret, handler },
        );
        Ok(self)
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<Service>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<Service>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a service under its own name. Mirrors `Server.Register`, minus
/// the panic-on-nil (Rust's type system already rules that out) and the
/// last-return-must-implement-error check (every `HandlerFn` already returns
/// `Result`, so that invariant holds by construction).
pub fn register(service: Service) -> Result<(), RegisterError> {
    let mut reg = registry().write().unwrap();
    if reg.contains_key(&service.name) {
        return Err(RegisterError::DuplicateService(service.name));
    }
    reg.insert(service.name.clone(), Arc::new(service));
    Ok(())
}

pub fn unregister(service_name: &str) {
    registry().write().unwrap().remove(service_name);
}

pub fn lookup(service_name: &str) -> Option<Arc<Service>> {
    registry().read().unwrap().get(service_name).cloned()
}
