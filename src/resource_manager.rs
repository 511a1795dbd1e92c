//! Resource management

use crate::error::ReductionError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate resources to
/// block tasks. Resource management is performed using a Tokio Semaphore for each type of
/// resource.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for memory (bytes).
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,

    /// Optional semaphore for concurrent block tasks.
    tasks: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(memory_limit: Option<usize>, task_limit: Option<usize>) -> Self {
        Self {
            memory: memory_limit.map(Semaphore::new),
            total_memory: memory_limit,
            tasks: task_limit.map(Semaphore::new),
        }
    }

    /// Acquire memory resource.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, ReductionError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(ReductionError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        optional_acquire(&self.memory, bytes).await
    }

    /// Acquire a block task resource.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, ReductionError> {
        optional_acquire(&self.tasks, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, ReductionError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
