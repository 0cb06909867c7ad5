//! Request/response `Value` conversion at the HTTP boundary (spec §4.7
//! step 4: "invoke the user-registered handler with request/response
//! Values").
//!
//! Neither spec.md nor the teacher fixes an exact wire shape for this
//! handoff (raya has no embedded HTTP server at all — see DESIGN.md), so
//! the request and response are plain associative arrays built from the
//! same `EmberArray`/`EmberString` primitives every other native boundary
//! uses: a script-level handler reads `$request["method"]` etc. and
//! returns `["status" => 200, "headers" => [...], "body" => "..."]`.

use ember_core::heap::array::{ArrayKey, EmberArray};
use ember_core::heap::string::{Encoding, EmberString};
use ember_core::value::HeapTag;
use ember_core::vm::Vm;
use ember_core::Value;
use ember_http::{HttpResponse, RequestContext};

/// Build the request array passed as the sole argument to a route's script
/// function: `method`, `path`, `query`, `headers`, `body`, `params`. Every
/// value allocated here is registered with `vm`'s collector, same as
/// anything the evaluator itself allocates (see `ember_core::eval::Evaluator`'s
/// `alloc_*` helpers) — otherwise a request handler that stashes part of its
/// own request array somewhere long-lived would hand back a value the
/// collector never traces.
pub fn request_to_value(vm: &mut Vm, ctx: &RequestContext) -> Value {
    let mut alloc_str = |vm: &mut Vm, s: EmberString| -> Value {
        let v = ember_core::heap::alloc_string(s);
        vm.memory.register(v);
        v
    };

    let mut request = EmberArray::new();
    let method = alloc_str(vm, EmberString::from_str(&ctx.request.method));
    request.set(ArrayKey::from("method"), method);
    let path = alloc_str(vm, EmberString::from_str(&ctx.request.path));
    request.set(ArrayKey::from("path"), path);
    let query = alloc_str(vm, EmberString::from_str(&ctx.request.query));
    request.set(ArrayKey::from("query"), query);

    let mut headers = EmberArray::new();
    for (name, value) in &ctx.request.headers {
        let v = alloc_str(vm, EmberString::from_str(value));
        headers.set(ArrayKey::from(name.clone()), v);
    }
    let headers_val = ember_core::heap::alloc_array(headers);
    vm.memory.register(headers_val);
    request.set(ArrayKey::from("headers"), headers_val);

    let body = alloc_str(vm, EmberString::new(ctx.request.body.clone(), Encoding::Binary));
    request.set(ArrayKey::from("body"), body);

    let mut params = EmberArray::new();
    for (name, value) in &ctx.params {
        let v = alloc_str(vm, EmberString::from_str(value));
        params.set(ArrayKey::from(name.clone()), v);
    }
    let params_val = ember_core::heap::alloc_array(params);
    vm.memory.register(params_val);
    request.set(ArrayKey::from("params"), params_val);

    let request_val = ember_core::heap::alloc_array(request);
    vm.memory.register(request_val);
    request_val
}

/// Call `function` with the request array built from `ctx`, convert the
/// return value into an `HttpResponse`, and release the call's return
/// value once read. An uncaught exception becomes a `500`.
pub fn dispatch_request(vm: &mut Vm, function: &str, ctx: &mut RequestContext) -> HttpResponse {
    let request = request_to_value(vm, ctx);
    match vm.call(function, vec![request]) {
        Ok(result) => response_from_value(result),
        Err(exc) => HttpResponse::text(500, exc.value.message()),
    }
}

/// Read a response array (`status`, `headers`, `body`) into an
/// `HttpResponse`, releasing the array afterwards.
fn response_from_value(value: Value) -> HttpResponse {
    let response = read_response(value);
    ember_core::heap::release(value);
    response
}

fn read_response(value: Value) -> HttpResponse {
    let Some(addr) = value.as_addr_of(HeapTag::Array) else {
        return HttpResponse::text(500, "route handler did not return a response array");
    };
    let arr = unsafe { ember_core::heap::deref::<EmberArray>(addr) };

    let status = arr.get(&ArrayKey::from("status")).and_then(|v| v.as_int()).unwrap_or(200).clamp(100, 599) as u16;

    let body = arr.get(&ArrayKey::from("body")).and_then(string_bytes).unwrap_or_default();
    let mut response = HttpResponse::with_status(status);
    response.body = body;

    if let Some(headers_value) = arr.get(&ArrayKey::from("headers")) {
        if let Some(headers_addr) = headers_value.as_addr_of(HeapTag::Array) {
            let headers = unsafe { ember_core::heap::deref::<EmberArray>(headers_addr) };
            for (key, v) in headers.iter() {
                if let ArrayKey::Str(name) = key {
                    if let Some(bytes) = string_bytes(v) {
                        response.headers.push((name.clone(), String::from_utf8_lossy(&bytes).into_owned()));
                    }
                }
            }
        }
    }

    response
}

fn string_bytes(v: Value) -> Option<Vec<u8>> {
    let addr = v.as_addr_of(HeapTag::String)?;
    Some(unsafe { ember_core::heap::deref::<EmberString>(addr) }.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::heap::array::ArrayKey as Key;

    #[test]
    fn request_value_carries_method_and_path() {
        let mut vm = Vm::new(std::rc::Rc::new(ember_core::ast::Program::new("test.phpl")));
        let mut ctx = RequestContext::new_standalone();
        ctx.request.method = "GET".to_string();
        ctx.request.path = "/users/7".to_string();
        let value = request_to_value(&mut vm, &ctx);
        let addr = value.as_addr_of(HeapTag::Array).unwrap();
        let arr = unsafe { ember_core::heap::deref::<EmberArray>(addr) };
        let method_addr = arr.get(&Key::from("method")).unwrap().as_addr_of(HeapTag::String).unwrap();
        let method = unsafe { ember_core::heap::deref::<EmberString>(method_addr) };
        assert_eq!(method.to_string_lossy(), "GET");
        ember_core::heap::release(value);
    }

    #[test]
    fn response_value_with_no_status_defaults_to_200() {
        let mut arr = EmberArray::new();
        arr.set(ArrayKey::from("body"), ember_core::heap::alloc_string(EmberString::from_str("ok")));
        let value = ember_core::heap::alloc_array(arr);
        let response = response_from_value(value);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
    }

    #[test]
    fn response_value_with_explicit_headers_carries_them_through() {
        let mut headers = EmberArray::new();
        headers.set(ArrayKey::from("X-Test"), ember_core::heap::alloc_string(EmberString::from_str("1")));
        let mut arr = EmberArray::new();
        arr.set(ArrayKey::from("status"), Value::of_int(201));
        arr.set(ArrayKey::from("headers"), ember_core::heap::alloc_array(headers));
        let value = ember_core::heap::alloc_array(arr);
        let response = response_from_value(value);
        assert_eq!(response.status, 201);
        assert!(response.headers.iter().any(|(k, v)| k == "X-Test" && v == "1"));
    }

    #[test]
    fn non_array_return_value_is_a_500() {
        let response = response_from_value(Value::null());
        assert_eq!(response.status, 500);
    }
}
