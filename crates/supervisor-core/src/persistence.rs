//! The narrow persistence port the core depends on. Concrete adapters (e.g.
//! the TOML file store in `supervisor-store`) implement this trait; the core
//! never assumes a storage engine.

use async_trait::async_trait;

use crate::descriptor::{Descriptor, RestartPolicy};
use crate::error::Result;
use crate::scheduler::ScheduleRecord;

/// What `LoadAll` returns at startup.
pub struct LoadedState {
    pub descriptors: Vec<Descriptor>,
    pub policies: Vec<RestartPolicy>,
    pub schedules: Vec<ScheduleRecord>,
}

/// Key-value persistence of descriptors, policies, and schedules. Writes are
/// expected to be transactional at the single-row granularity: a failed
/// `SaveDescriptor` must not corrupt a previously saved entry.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn load_all(&self) -> Result<LoadedState>;

    async fn save_descriptor(&self, descriptor: &Descriptor) -> Result<()>;
    async fn delete_descriptor(&self, name: &str) -> Result<()>;

    async fn save_policy(&self, policy: &RestartPolicy) -> Result<()>;
    async fn delete_policy(&self, name: &str) -> Result<()>;

    async fn save_schedule(&self, schedule: &ScheduleRecord) -> Result<()>;
    async fn delete_schedule(&self, name: &str) -> Result<()>;

    /// Optional: appends a captured output line to durable storage. The core
    /// functions correctly without it (output rings are in-memory only).
    async fn append_log(&self, _name: &str, _stream: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory stand-in used to exercise the port's contract in core
    /// tests without pulling in the file-backed adapter crate.
    #[derive(Default)]
    struct MemoryPort {
        descriptors: Mutex<Vec<Descriptor>>,
    }

    #[async_trait]
    impl PersistencePort for MemoryPort {
        async fn load_all(&self) -> Result<LoadedState> {
            Ok(LoadedState {
                descriptors: self.descriptors.lock().unwrap().clone(),
                policies: vec![],
                schedules: vec![],
            })
        }

        async fn save_descriptor(&self, descriptor: &Descriptor) -> Result<()> {
            let mut d = self.descriptors.lock().unwrap();
            d.retain(|x| x.name != descriptor.name);
            d.push(descriptor.clone());
            Ok(())
        }

        async fn delete_descriptor(&self, name: &str) -> Result<()> {
            self.descriptors.lock().unwrap().retain(|x| x.name != name);
            Ok(())
        }

        async fn save_policy(&self, _policy: &RestartPolicy) -> Result<()> {
            Ok(())
        }

        async fn delete_policy(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn save_schedule(&self, _schedule: &ScheduleRecord) -> Result<()> {
            Ok(())
        }

        async fn delete_schedule(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        use std::collections::BTreeMap;
        let port = MemoryPort::default();
        let spec = crate::descriptor::ProcessSpec {
            command: "echo".into(),
            args: vec![],
            working_dir: None,
            env: BTreeMap::new(),
            group: None,
            policy: None,
        };
        let d = Descriptor::new("p".into(), spec, 0);
        port.save_descriptor(&d).await.unwrap();
        let loaded = port.load_all().await.unwrap();
        assert_eq!(loaded.descriptors.len(), 1);
        assert_eq!(loaded.descriptors[0].name, "p");

        port.delete_descriptor("p").await.unwrap();
        let loaded = port.load_all().await.unwrap();
        assert!(loaded.descriptors.is_empty());
    }
}
