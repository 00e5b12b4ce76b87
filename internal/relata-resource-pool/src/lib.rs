#![warn(missing_docs)]
//! Resource pool implementation
//!
//! A bounded FIFO pool: at most `max_open` resources exist at the same time, at
//! most `max_idle` of them are kept once given back, and resources are recycled
//! after a maximum idle duration or a maximum total lifetime.

use anyhow::Context;
use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use thiserror::Error;

/// Generic error type
pub type StdError = anyhow::Error;

/// Generic result type
pub type StdResult<T> = anyhow::Result<T, StdError>;

/// [ResourcePool] related errors.
#[derive(Error, Debug)]
pub enum ResourcePoolError {
    /// Internal Mutex is poisoned
    #[error("Poisoned mutex caused error during acquire lock on resource pool")]
    PoisonedLock,

    /// Acquire resource has timed out
    #[error("Acquire resource has timed out")]
    AcquireTimeout,

    /// The pool can not open new resources
    #[error("Resource pool has no factory to open new resources")]
    FactoryUnavailable,
}

/// Sizing and recycling rules of a [ResourcePool].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePoolConfig {
    /// Maximum number of resources alive at the same time (idle or acquired).
    pub max_open: usize,

    /// Maximum number of idle resources kept in the pool.
    pub max_idle: usize,

    /// Idle resources older than this are discarded instead of being handed out.
    pub max_idle_time: Option<Duration>,

    /// Resources older than this are discarded, whatever their state.
    pub max_lifetime: Option<Duration>,
}

impl ResourcePoolConfig {
    /// Config of a pool that keeps all its resources forever.
    pub fn fixed(size: usize) -> Self {
        Self {
            max_open: size,
            max_idle: size,
            max_idle_time: None,
            max_lifetime: None,
        }
    }

    fn is_expired(&self, created_at: Instant, idle_since: Instant, now: Instant) -> bool {
        let too_old = self
            .max_lifetime
            .is_some_and(|lifetime| now.duration_since(created_at) >= lifetime);
        let idle_too_long = self
            .max_idle_time
            .is_some_and(|idle_time| now.duration_since(idle_since) >= idle_time);

        too_old || idle_too_long
    }
}

type ResourceFactory<T> = Box<dyn Fn() -> StdResult<T> + Send + Sync>;

struct IdleResource<T> {
    resource: T,
    created_at: Instant,
    idle_since: Instant,
}

struct PoolState<T> {
    idle: VecDeque<IdleResource<T>>,
    /// Number of resources alive, idle ones included.
    open: usize,
}

/// Resource pool implementation (FIFO)
pub struct ResourcePool<T: Reset + Send + Sync> {
    config: ResourcePoolConfig,

    /// Discriminant for the resource pool to check if a returned resource is stale
    discriminant: Mutex<u64>,

    /// Resources in the pool
    state: Mutex<PoolState<T>>,

    /// Condition variable to notify when a resource or a free slot is available
    not_empty: Condvar,

    /// Opens a new resource when no idle one is available
    factory: Option<ResourceFactory<T>>,
}

impl<T: Reset + Send + Sync> ResourcePool<T> {
    /// Create a fixed size resource pool from already opened resources
    pub fn new(pool_size: usize, resources: Vec<T>) -> Self {
        let now = Instant::now();
        let open = resources.len();
        let idle = resources
            .into_iter()
            .map(|resource| IdleResource {
                resource,
                created_at: now,
                idle_since: now,
            })
            .collect();

        Self {
            config: ResourcePoolConfig::fixed(pool_size),
            discriminant: Mutex::new(0),
            state: Mutex::new(PoolState { idle, open }),
            not_empty: Condvar::new(),
            factory: None,
        }
    }

    /// Create an empty resource pool that opens resources on demand
    pub fn with_factory<F>(config: ResourcePoolConfig, factory: F) -> Self
    where
        F: Fn() -> StdResult<T> + Send + Sync + 'static,
    {
        Self {
            config,
            discriminant: Mutex::new(0),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                open: 0,
            }),
            not_empty: Condvar::new(),
            factory: Some(Box::new(factory)),
        }
    }

    /// Acquire a resource from the pool with a timeout
    ///
    /// An idle resource is handed out first, otherwise a new one is opened if the
    /// pool is below `max_open`, otherwise the caller waits until a resource is
    /// given back or the timeout elapses.
    pub fn acquire_resource(&self, timeout: Duration) -> StdResult<ResourcePoolItem<'_, T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state("acquire_resource")?;

        loop {
            self.evict_expired(&mut state);

            if let Some(idle) = state.idle.pop_front() {
                let discriminant = self.discriminant()?;
                return Ok(ResourcePoolItem::new(
                    self,
                    idle.resource,
                    idle.created_at,
                    discriminant,
                ));
            }

            if state.open < self.config.max_open {
                if let Some(factory) = &self.factory {
                    state.open += 1;
                    drop(state);

                    return match factory() {
                        Ok(resource) => Ok(ResourcePoolItem::new(
                            self,
                            resource,
                            Instant::now(),
                            self.discriminant()?,
                        )),
                        Err(error) => {
                            self.release_slot()?;
                            Err(error.context("Resource pool 'acquire_resource' failed opening a resource"))
                        }
                    };
                }
            }

            if self.factory.is_none() && state.open == 0 {
                return Err(ResourcePoolError::FactoryUnavailable)
                    .with_context(|| "Resource pool 'acquire_resource' has no resource left");
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ResourcePoolError::AcquireTimeout)
                    .with_context(|| "Resource pool 'acquire_resource' has timed out");
            }

            let (state_locked, _wait_result) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .map_err(|_| ResourcePoolError::PoisonedLock)
                .with_context(|| "Resource pool 'acquire_resource' failed waiting for resource")?;
            state = state_locked;
        }
    }

    /// Give back a resource pool item to the pool
    /// If the resource pool item has not been taken yet, the resource will be given back
    /// If the resource pool item has been taken, nothing will happen
    pub fn give_back_resource_pool_item(
        &self,
        resource_pool_item: ResourcePoolItem<'_, T>,
    ) -> StdResult<()> {
        let mut resource_pool_item = resource_pool_item;
        let created_at = resource_pool_item.created_at;
        let discriminant = resource_pool_item.discriminant;
        match resource_pool_item.take() {
            Some(mut resource) => match resource.reset() {
                Ok(()) => self.give_back_resource(resource, created_at, discriminant),
                Err(error) => {
                    self.release_slot()?;
                    Err(error.context("Resource pool could not reset the given back resource"))
                }
            },
            None => Ok(()),
        }
    }

    /// Give back a resource to the pool
    ///
    /// The resource is closed instead when it is stale (discriminant mismatch),
    /// when it outlived `max_lifetime` or when the idle list is already full.
    fn give_back_resource(
        &self,
        resource: T,
        created_at: Instant,
        discriminant: u64,
    ) -> StdResult<()> {
        let current_discriminant = self.discriminant()?;
        let mut state = self.lock_state("give_back_resource")?;
        let now = Instant::now();

        if current_discriminant != discriminant
            || self.config.is_expired(created_at, now, now)
            || state.idle.len() >= self.config.max_idle
        {
            state.open = state.open.saturating_sub(1);
            drop(state);
            drop(resource);
            self.not_empty.notify_one();

            return Ok(());
        }

        state.idle.push_back(IdleResource {
            resource,
            created_at,
            idle_since: now,
        });
        self.not_empty.notify_one();

        Ok(())
    }

    /// Clear the pool
    ///
    /// Idle resources are closed and resources currently acquired become stale: they
    /// will be closed when given back.
    pub fn clear(&self) -> StdResult<()> {
        let discriminant = self.discriminant()?;
        self.set_discriminant(discriminant.wrapping_add(1))?;

        let mut state = self.lock_state("clear")?;
        let closed = state.idle.len();
        state.idle.clear();
        state.open = state.open.saturating_sub(closed);
        self.not_empty.notify_all();

        Ok(())
    }

    /// Get the discriminant of the resource pool item
    pub fn discriminant(&self) -> StdResult<u64> {
        Ok(*self
            .discriminant
            .lock()
            .map_err(|_| ResourcePoolError::PoisonedLock)
            .with_context(|| "Resource pool 'discriminant' failed locking Mutex")?)
    }

    fn set_discriminant(&self, discriminant: u64) -> StdResult<()> {
        let mut discriminant_guard = self
            .discriminant
            .lock()
            .map_err(|_| ResourcePoolError::PoisonedLock)
            .with_context(|| "Resource pool 'set_discriminant' failed locking Mutex")?;
        *discriminant_guard = discriminant;

        Ok(())
    }

    /// Count the idle resources in the pool
    pub fn count(&self) -> StdResult<usize> {
        Ok(self.lock_state("count")?.idle.len())
    }

    /// Count the resources alive, idle or acquired
    pub fn open_count(&self) -> StdResult<usize> {
        Ok(self.lock_state("open_count")?.open)
    }

    /// Maximum number of resources alive at the same time
    pub fn size(&self) -> usize {
        self.config.max_open
    }

    /// Sizing and recycling rules of this pool
    pub fn config(&self) -> &ResourcePoolConfig {
        &self.config
    }

    fn lock_state(&self, operation: &str) -> StdResult<MutexGuard<'_, PoolState<T>>> {
        self.state
            .lock()
            .map_err(|_| ResourcePoolError::PoisonedLock)
            .with_context(|| format!("Resource pool '{operation}' failed locking Mutex"))
    }

    fn evict_expired(&self, state: &mut PoolState<T>) {
        let now = Instant::now();
        let before = state.idle.len();
        state
            .idle
            .retain(|idle| !self.config.is_expired(idle.created_at, idle.idle_since, now));
        state.open = state.open.saturating_sub(before - state.idle.len());
    }

    fn release_slot(&self) -> StdResult<()> {
        let mut state = self.lock_state("release_slot")?;
        state.open = state.open.saturating_sub(1);
        self.not_empty.notify_one();

        Ok(())
    }
}

/// Resource pool item which will return the resource to the pool when dropped
pub struct ResourcePoolItem<'a, T: Reset + Send + Sync> {
    resource_pool: &'a ResourcePool<T>,
    discriminant: u64,
    created_at: Instant,
    resource: Option<T>,
}

impl<'a, T: Reset + Send + Sync> ResourcePoolItem<'a, T> {
    fn new(
        resource_pool: &'a ResourcePool<T>,
        resource: T,
        created_at: Instant,
        discriminant: u64,
    ) -> Self {
        Self {
            resource_pool,
            discriminant,
            created_at,
            resource: Some(resource),
        }
    }

    /// Get the discriminant of the resource pool item
    pub fn discriminant(&self) -> u64 {
        self.discriminant
    }

    /// Instant at which the underlying resource was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Take the inner resource if exists
    fn take(&mut self) -> Option<T> {
        self.resource.take()
    }
}

impl<T: Reset + Send + Sync> Deref for ResourcePoolItem<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.resource.as_ref().unwrap()
    }
}

impl<T: Reset + Send + Sync> DerefMut for ResourcePoolItem<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource.as_mut().unwrap()
    }
}

impl<T: Reset + Send + Sync> Drop for ResourcePoolItem<'_, T> {
    fn drop(&mut self) {
        if let Some(mut resource) = self.take() {
            let _ = match resource.reset() {
                Ok(()) => self.resource_pool.give_back_resource(
                    resource,
                    self.created_at,
                    self.discriminant,
                ),
                Err(_) => self.resource_pool.release_slot(),
            };
        }
    }
}

/// Reset trait which is implemented by pooled resource items.
/// As pool resource items are mutable, this will guarantee that the pool stays  consistent
/// and that acquired resource items do not depend from previous computations.
pub trait Reset {
    /// Reset the resource
    fn reset(&mut self) -> StdResult<()> {
        Ok(())
    }
}
