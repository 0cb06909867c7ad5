//! Ember Runtime
//!
//! Binds the core VM (`ember-core`), the native function contract
//! (`ember-sdk`), the standard library (`ember-stdlib`) and the embedded
//! HTTP server (`ember-http`) into one embeddable session: [`EmberRuntime`].
//!
//! - **context**: `ember_sdk::NativeContext` implementation backed by a `Vm`
//! - **bind**: wires `ember-stdlib`'s native registry onto a `Vm`
//! - **vm_setup**: builds a `Vm` sized from [`config::RuntimeOptions`]
//! - **config**: TOML-loadable resource ceilings and HTTP server settings
//! - **http**: request/response `Value` conversion at the HTTP boundary
//! - **task**: bridges `Scheduler::spawn` onto a `Vm`-bound script function

#![warn(missing_docs)]

pub mod bind;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod task;
pub mod vm_setup;

use std::cell::RefCell;
use std::rc::Rc;

use ember_core::ast::Program;
use ember_core::value::Value;
use ember_core::vm::Vm;
use ember_http::{HttpServer, RequestContext, Router};

pub use config::RuntimeOptions;
pub use context::VmContext;
pub use error::{RuntimeError, RuntimeResult};

/// An embeddable Ember session: one `Vm`, configured per [`RuntimeOptions`],
/// optionally serving HTTP requests by dispatching routes into script
/// functions (spec §4.7).
///
/// Holds its `Vm` behind `Rc<RefCell<_>>` rather than owning it outright so
/// [`Self::route_to_function`] can hand the HTTP router closures that reach
/// back into the same `Vm` a direct [`Self::call`] would use — the accept
/// loop is single-threaded (spec §4.7), so the `RefCell` is never
/// contended.
pub struct EmberRuntime {
    vm: Rc<RefCell<Vm>>,
    options: RuntimeOptions,
}

impl EmberRuntime {
    /// Build a runtime for `program`, with a `Vm` sized and stdlib-bound
    /// per `options`.
    pub fn new(program: Rc<Program>, options: RuntimeOptions) -> Self {
        let vm = vm_setup::create_vm(program, &options);
        Self { vm: Rc::new(RefCell::new(vm)), options }
    }

    /// Run the program's entry point (spec.md's top-level `run`).
    pub fn run(&self) -> RuntimeResult<Value> {
        Ok(self.vm.borrow_mut().run()?)
    }

    /// Call a top-level function by name, as an embedder driving the VM
    /// directly rather than through HTTP.
    pub fn call(&self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        Ok(self.vm.borrow_mut().call(name, args)?)
    }

    /// Register a route that dispatches matched requests to the named
    /// top-level script function (spec §4.7 step 4).
    pub fn route_to_function(&self, router: &mut Router, method: &str, pattern: &str, function: &str) {
        let vm = self.vm.clone();
        let function = function.to_string();
        router.route(method, pattern, move |ctx: &mut RequestContext| {
            http::dispatch_request(&mut vm.borrow_mut(), &function, ctx)
        });
    }

    /// Serve `router` forever on `options.http_bind`, with the configured
    /// per-connection timeouts (spec §4.7, §5 "Timeouts").
    pub fn serve(&self, router: Router) -> RuntimeResult<()> {
        let mut server = HttpServer::new(router).with_limits(self.options.server_limits());
        server.serve(&self.options.http_bind)?;
        Ok(())
    }

    /// The resolved configuration this runtime was built with.
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::heap::function::NativeFunction;

    fn program() -> Rc<Program> {
        Rc::new(Program::new("test.phpl"))
    }

    #[test]
    fn call_reaches_a_registered_native_function() {
        let runtime = EmberRuntime::new(program(), RuntimeOptions::default());
        runtime.vm.borrow_mut().register_native(NativeFunction::new("answer", 0, Some(0), |_vm, _args| {
            Ok(Value::of_int(42))
        }));
        assert_eq!(runtime.call("answer", Vec::new()).unwrap(), Value::of_int(42));
    }

    #[test]
    fn route_to_function_dispatches_through_the_same_vm() {
        let runtime = EmberRuntime::new(program(), RuntimeOptions::default());
        runtime.vm.borrow_mut().register_native(NativeFunction::new("handler", 1, Some(1), |_vm, _args| {
            Ok(Value::null())
        }));
        let mut router = Router::new();
        runtime.route_to_function(&mut router, "GET", "/ping", "handler");
        let mut ctx = RequestContext::new_standalone();
        ctx.request.method = "GET".to_string();
        ctx.request.path = "/ping".to_string();
        let (handler, _) = router.find("GET", "/ping").unwrap();
        let response = handler.handle(&mut ctx);
        assert_eq!(response.status, 200);
    }
}
