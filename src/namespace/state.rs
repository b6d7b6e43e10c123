use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slots = HashMap<TypeId, Box<dyn Any + Send>>;

/// Private mutable state of a namespace, one slot per Rust type
///
/// Cloning yields another handle to the same slots.
#[derive(Clone, Default)]
pub struct State {
    slots: Arc<Mutex<Slots>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value, returning the previous one of the same type
    pub fn put<T: Any + Send>(&self, value: T) -> Option<T> {
        self.slots()
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Remove and return the value of type `T`
    pub fn take<T: Any + Send>(&self) -> Option<T> {
        self.slots()
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Clone out the value of type `T`
    pub fn get<T: Any + Send + Clone>(&self) -> Option<T> {
        self.slots()
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains<T: Any + Send>(&self) -> bool {
        self.slots().contains_key(&TypeId::of::<T>())
    }

    /// Mutate the value of type `T` in place, creating it with `Default` first
    ///
    /// The state lock is held while `f` runs, so `f` must not touch this
    /// `State` again.
    pub fn with<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Default,
    {
        let mut slots = self.slots();
        let slot = slots
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        let value = slot
            .downcast_mut::<T>()
            .expect("state slot is keyed by its own TypeId");
        f(value)
    }

    /// Whether both handles point at the same container
    pub fn ptr_eq(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("slots", &self.slots().len())
            .finish()
    }
}
