use daisy_proto::{DescriptorRecord, Message, MethodId};

use crate::RpcError;

/// Static metadata for one method: numeric id, names and argument/reply types.
///
/// Built once by [`crate::Registry`] and shared behind an `Arc`; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    id: MethodId,
    qualified_name: String,
    call_name: String,
    argument_type: String,
    reply_type: Option<String>,
}

impl Descriptor {
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// `Module.Method`, matched against `Module::NAME` at registration.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// `module.method`, used by `call` / `go_call` / `invoke`.
    pub fn call_name(&self) -> &str {
        &self.call_name
    }

    pub fn argument_type(&self) -> &str {
        &self.argument_type
    }

    pub fn reply_type(&self) -> Option<&str> {
        self.reply_type.as_deref()
    }

    /// `false` for fire-and-forget methods.
    pub fn has_reply(&self) -> bool {
        self.reply_type.is_some()
    }

    pub fn accepts_argument<A: Message>(&self) -> bool {
        self.argument_type == A::TYPE_NAME
    }

    pub fn returns_reply<R: Message>(&self) -> bool {
        self.reply_type.as_deref() == Some(R::TYPE_NAME)
    }

    pub(crate) fn check_call<A: Message, R: Message>(&self) -> Result<(), RpcError> {
        let Some(reply_type) = self.reply_type() else {
            return Err(RpcError::NotCallable {
                method: self.call_name.clone(),
            });
        };
        self.check_argument::<A>()?;
        if reply_type != R::TYPE_NAME {
            return Err(RpcError::TypeMismatch {
                method: self.call_name.clone(),
                position: "reply",
                expected: reply_type.to_string(),
                found: R::TYPE_NAME,
            });
        }
        Ok(())
    }

    pub(crate) fn check_invoke<A: Message>(&self) -> Result<(), RpcError> {
        if self.has_reply() {
            return Err(RpcError::UseCallInstead {
                method: self.call_name.clone(),
            });
        }
        self.check_argument::<A>()
    }

    fn check_argument<A: Message>(&self) -> Result<(), RpcError> {
        if !self.accepts_argument::<A>() {
            return Err(RpcError::TypeMismatch {
                method: self.call_name.clone(),
                position: "argument",
                expected: self.argument_type.clone(),
                found: A::TYPE_NAME,
            });
        }
        Ok(())
    }
}

impl From<DescriptorRecord> for Descriptor {
    fn from(record: DescriptorRecord) -> Self {
        Self {
            id: record.id,
            qualified_name: record.qualified_name,
            call_name: record.call_name,
            argument_type: record.argument_type,
            reply_type: record.reply_type,
        }
    }
}
