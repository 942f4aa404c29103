//! Method table

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::RpcError;
use crate::error::ProtocolError;
use crate::wire::constants::RESERVED_METHODS;
use crate::wire::{Message, MessageKind, MethodSignature, Signature, Value};

/// Method implementation
pub type MethodHandler = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A registered method
pub struct Method {
    name: String,
    signature: MethodSignature,
    description: String,
    handler: Arc<MethodHandler>,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("description", &self.description)
            .finish()
    }
}

/// Registry of callable methods
pub struct MethodTable {
    methods: RwLock<HashMap<String, Arc<Method>>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Register a method under a `ret:params` signature
    ///
    /// ```
    /// # use svcstream::{MethodTable, Value};
    /// let methods = MethodTable::new();
    /// methods
    ///     .register("add", "i:ii", "Sum of two integers", |args| {
    ///         match (&args[0], &args[1]) {
    ///             (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a + b)),
    ///             _ => Err("expected integers".into()),
    ///         }
    ///     })
    ///     .unwrap();
    /// assert_eq!(
    ///     methods.call("add", &[Value::Integer(2), Value::Integer(3)]).unwrap(),
    ///     Value::Integer(5)
    /// );
    /// ```
    pub fn register<F>(
        &self,
        name: &str,
        signature: &str,
        description: &str,
        handler: F,
    ) -> Result<(), RpcError>
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        if RESERVED_METHODS.contains(&name) {
            return Err(RpcError::ReservedName(name.to_string()));
        }
        let signature = MethodSignature::parse(signature).map_err(RpcError::InvalidSignature)?;

        let mut methods = self.methods.write();
        if methods.contains_key(name) {
            return Err(RpcError::DuplicateMethod(name.to_string()));
        }

        tracing::debug!(method = %name, signature = %signature, "Method registered");
        methods.insert(
            name.to_string(),
            Arc::new(Method {
                name: name.to_string(),
                signature,
                description: description.to_string(),
                handler: Arc::new(handler),
            }),
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.methods.write().remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.read().get(name).cloned()
    }

    /// All methods, ordered by name
    pub fn list(&self) -> Vec<Arc<Method>> {
        let mut methods: Vec<_> = self.methods.read().values().cloned().collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        methods
    }

    /// Invoke a method after checking its arguments
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, RpcError> {
        let method = self
            .lookup(name)
            .ok_or_else(|| RpcError::UnknownMethod(name.to_string()))?;

        check_args(&method.signature.params, args)?;

        // Handler runs without the table lock
        let value = (method.handler)(args).map_err(RpcError::Failed)?;

        let found = value.type_code();
        if found != method.signature.ret {
            return Err(RpcError::ReturnType {
                expected: method.signature.ret.as_char(),
                found: found.as_char(),
            });
        }
        Ok(value)
    }

    /// Answer a method-call message with a return-value or error message
    pub fn dispatch(&self, call: &Message) -> Message {
        debug_assert_eq!(call.kind, MessageKind::Call);

        match self.call(&call.name, &call.body) {
            Ok(value) => Message::return_value(call.name.clone(), value),
            Err(e) => {
                tracing::debug!(method = %call.name, error = %e, "Method call failed");
                Message::error(call.name.clone(), e.to_string())
            }
        }
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new()
    }
}

fn check_args(params: &Signature, args: &[Value]) -> Result<(), RpcError> {
    let codes = params.codes();
    if codes.len() != args.len() {
        return Err(RpcError::Arguments(
            ProtocolError::ArgumentCount {
                expected: codes.len(),
                actual: args.len(),
            },
        ));
    }

    for (index, (expected, arg)) in codes.iter().zip(args).enumerate() {
        let found = arg.type_code();
        if found != *expected {
            return Err(RpcError::Arguments(
                ProtocolError::TypeMismatch {
                    index,
                    expected: expected.as_char(),
                    found: found.as_char(),
                },
            ));
        }
    }
    Ok(())
}
