//! Per-class typed decoders run on every decoded event.

use crate::reader::de;
use crate::reader::event::GenericEvent;
use crate::reader::types::jdk;
use crate::reader::Result;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub type TypedDecoder = fn(&GenericEvent) -> Result<Arc<dyn Any + Send + Sync>>;

fn decode_as<T: DeserializeOwned + Send + Sync + 'static>(
    event: &GenericEvent,
) -> Result<Arc<dyn Any + Send + Sync>> {
    let typed: T = de::from_event(event)?;
    Ok(Arc::new(typed))
}

/// Maps event class names to typed decoders.
///
/// Each registry is owned by whoever builds it. Decoding a chunk only reads it.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: FxHashMap<String, TypedDecoder>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with decoders for the common JDK events in [`jdk`].
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<jdk::ExecutionSample>(jdk::EXECUTION_SAMPLE);
        registry.register::<jdk::ObjectAllocationInNewTLAB>(jdk::OBJECT_ALLOCATION_IN_NEW_TLAB);
        registry.register::<jdk::ObjectAllocationOutsideTLAB>(jdk::OBJECT_ALLOCATION_OUTSIDE_TLAB);
        registry.register::<jdk::JavaMonitorEnter>(jdk::JAVA_MONITOR_ENTER);
        registry.register::<jdk::ThreadPark>(jdk::THREAD_PARK);
        registry.register::<jdk::CPULoad>(jdk::CPU_LOAD);
        registry.register::<jdk::ThreadStart>(jdk::THREAD_START);
        registry
    }

    /// Decodes events of `class_name` into `T`, replacing an earlier decoder.
    pub fn register<T: DeserializeOwned + Send + Sync + 'static>(&mut self, class_name: &str) {
        self.register_decoder(class_name, decode_as::<T>);
    }

    pub fn register_decoder(&mut self, class_name: &str, decoder: TypedDecoder) {
        self.decoders.insert(class_name.to_string(), decoder);
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.decoders.contains_key(class_name)
    }

    pub(crate) fn decode(&self, event: &GenericEvent) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        match self.decoders.get(event.class_name()) {
            Some(decoder) => decoder(event).map(Some),
            None => Ok(None),
        }
    }
}
