use crate::channel::Channel;
use crate::error::RegistryError;

/// Default number of channel slots.
pub const DEFAULT_SLOT_COUNT: usize = 10;

/// A channel the registry refused, handed back to the caller for teardown.
#[derive(Debug)]
pub struct InsertError {
    pub error: RegistryError,
    pub channel: Channel,
}

/// Fixed slot table owning every active channel.
///
/// Lookups are linear scans; with ten slots that beats hashing and the table
/// never allocates after construction.
#[derive(Debug)]
pub struct Registry {
    slots: Box<[Option<Channel>]>,
}

impl Registry {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count.max(1)).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn find_by_id(&self, id: u8) -> Option<&Channel> {
        self.iter().find(|channel| channel.id() == id)
    }

    pub fn find_by_id_mut(&mut self, id: u8) -> Option<&mut Channel> {
        self.iter_mut().find(|channel| channel.id() == id)
    }

    /// Place `channel` in the first free slot.
    pub fn insert(&mut self, channel: Channel) -> Result<usize, InsertError> {
        if self.find_by_id(channel.id()).is_some() {
            return Err(InsertError {
                error: RegistryError::AlreadyExists(channel.id()),
                channel,
            });
        }
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(channel);
                Ok(index)
            }
            None => Err(InsertError {
                error: RegistryError::NoSpace,
                channel,
            }),
        }
    }

    /// Take the channel registered under `id` out of the table.
    pub fn remove_by_id(&mut self, id: u8) -> Option<Channel> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|channel| channel.id() == id))?;
        self.slots[index].take()
    }

    /// Take whatever occupies slot `index`.
    pub fn remove_slot(&mut self, index: usize) -> Option<Channel> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_COUNT)
    }
}
