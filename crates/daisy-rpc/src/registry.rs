use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use daisy_proto::{protolist, DescriptorRecord, MethodId};

use crate::{ClientBuilder, Descriptor, RegistryError, RpcConfig, Server};

/// Immutable lookup tables over every known method.
///
/// Cheap to clone; all clones share the same descriptors.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    by_id: HashMap<MethodId, Arc<Descriptor>>,
    by_qualified_name: HashMap<String, Arc<Descriptor>>,
    by_call_name: HashMap<String, Arc<Descriptor>>,
}

impl Registry {
    pub fn new(records: impl IntoIterator<Item = DescriptorRecord>) -> Result<Self, RegistryError> {
        let mut by_id: HashMap<MethodId, Arc<Descriptor>> = HashMap::new();
        let mut by_qualified_name = HashMap::new();
        let mut by_call_name = HashMap::new();

        for record in records {
            let descriptor = Arc::new(Descriptor::from(record));
            if descriptor.id() <= 0 {
                return Err(RegistryError::InvalidId {
                    id: descriptor.id(),
                    qualified_name: descriptor.qualified_name().to_string(),
                });
            }
            if let Some(first) = by_id.get(&descriptor.id()) {
                return Err(RegistryError::DuplicateId {
                    id: descriptor.id(),
                    first: first.qualified_name().to_string(),
                    second: descriptor.qualified_name().to_string(),
                });
            }
            if by_qualified_name.contains_key(descriptor.qualified_name()) {
                return Err(RegistryError::DuplicateQualifiedName {
                    name: descriptor.qualified_name().to_string(),
                });
            }
            if by_call_name.contains_key(descriptor.call_name()) {
                return Err(RegistryError::DuplicateCallName {
                    name: descriptor.call_name().to_string(),
                });
            }

            by_qualified_name.insert(descriptor.qualified_name().to_string(), descriptor.clone());
            by_call_name.insert(descriptor.call_name().to_string(), descriptor.clone());
            by_id.insert(descriptor.id(), descriptor);
        }

        Ok(Self {
            inner: Arc::new(RegistryInner {
                by_id,
                by_qualified_name,
                by_call_name,
            }),
        })
    }

    /// Parse a protolist schema and build a registry from it.
    pub fn from_protolist(source: &str) -> Result<Self, RegistryError> {
        let modules = protolist::parse(source)?;
        Self::new(protolist::descriptor_records(&modules))
    }

    pub fn by_id(&self, id: MethodId) -> Option<&Arc<Descriptor>> {
        self.inner.by_id.get(&id)
    }

    pub fn by_qualified_name(&self, name: &str) -> Option<&Arc<Descriptor>> {
        self.inner.by_qualified_name.get(name)
    }

    pub fn by_call_name(&self, name: &str) -> Option<&Arc<Descriptor>> {
        self.inner.by_call_name.get(name)
    }

    /// Every descriptor, in no particular order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<Descriptor>> + '_ {
        self.inner.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.inner.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.by_id.is_empty()
    }

    pub fn server(&self, config: RpcConfig) -> Server {
        Server::new(self.clone(), config)
    }

    pub fn client(&self) -> ClientBuilder {
        ClientBuilder::new(self.clone())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.inner.by_id.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("Registry").field("ids", &ids).finish()
    }
}
