//! Bidirectional identity <-> name index.
//!
//! Names are matched case-insensitively: the reverse map is keyed by the
//! lowercased name while the forward map keeps the name as reported.

use azure_db::{PlayerId, PlayerName};
use scc::HashMap;
use scc::hash_map::Entry;
use tracing::{debug, warn};

pub struct NameIndex {
    by_id: HashMap<PlayerId, PlayerName>,
    by_name: HashMap<PlayerName, PlayerId>,
}

/// Reverse-map key for a validated name.
fn key_of(name: &PlayerName) -> PlayerName {
    let mut key = *name;
    key.make_ascii_lowercase();
    key
}

/// Reverse-map key for an arbitrary lookup string; `None` if it cannot be a name.
fn lookup_key(name: &str) -> Option<PlayerName> {
    if name.is_empty() {
        return None;
    }
    PlayerName::try_from(name).ok().map(|name| key_of(&name))
}

impl NameIndex {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Identity currently holding `name`, ignoring case.
    pub fn resolve_name(&self, name: &str) -> Option<PlayerId> {
        let key = lookup_key(name)?;
        let id = self.by_name.read_sync(&key, |_, id| *id)?;

        let agrees = self
            .by_id
            .read_sync(&id, |_, current| key_of(current) == key)
            .unwrap_or(false);
        if agrees {
            return Some(id);
        }

        // Reverse entry outlived its forward entry; drop it unless it moved meanwhile
        if self.by_name.remove_if_sync(&key, |owner| *owner == id).is_some() {
            warn!(%id, name = %key, "dropped name mapping with no matching identity");
        }
        None
    }

    /// Name last reported for `id`.
    pub fn resolve_id(&self, id: PlayerId) -> Option<PlayerName> {
        self.by_id.read_sync(&id, |_, name| *name)
    }

    /// Record that `id` is now called `name`. Returns false if nothing changed.
    ///
    /// Only presence events call this: a reverse mapping that pointed at
    /// another identity is overwritten, and that identity loses its claim on
    /// the name. The identity's forward entry stays locked while the reverse
    /// map is written, so readers of either direction never see only half of
    /// the update. Empty names are never indexed.
    pub fn update(&self, id: PlayerId, name: PlayerName) -> bool {
        if name.is_empty() {
            return false;
        }
        let key = key_of(&name);
        let entry = self.by_id.entry_sync(id);
        let previous = match &entry {
            Entry::Occupied(occupied) => Some(*occupied.get()),
            Entry::Vacant(_) => None,
        };

        if previous == Some(name)
            && self
                .by_name
                .read_sync(&key, |_, owner| *owner == id)
                .unwrap_or(false)
        {
            return false;
        }

        let displaced = self.claim(key, id);
        if let Some(previous) = previous {
            let previous_key = key_of(&previous);
            if previous_key != key {
                self.by_name
                    .remove_if_sync(&previous_key, |owner| *owner == id);
            }
        }

        match entry {
            Entry::Occupied(mut occupied) => *occupied.get_mut() = name,
            Entry::Vacant(vacant) => {
                vacant.insert_entry(name);
            }
        }

        if let Some(other) = displaced {
            warn!(%id, %other, %name, "name reassigned, dropping stale mapping");
            self.by_id
                .remove_if_sync(&other, |current| key_of(current) == key);
        }

        debug!(%id, %name, "updated name index");
        true
    }

    /// Point the reverse entry for `key` at `id`, returning a different previous owner.
    fn claim(&self, key: PlayerName, id: PlayerId) -> Option<PlayerId> {
        match self.by_name.entry_sync(key) {
            Entry::Occupied(mut occupied) => {
                let owner = std::mem::replace(occupied.get_mut(), id);
                (owner != id).then_some(owner)
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(id);
                None
            }
        }
    }

    /// Index a stored name for an identity the index does not know yet.
    ///
    /// Stored names may be stale, so nothing is overwritten: the call does
    /// nothing if `id` already has a name or `name` belongs to someone else.
    pub fn insert_if_free(&self, id: PlayerId, name: PlayerName) -> bool {
        if name.is_empty() {
            return false;
        }
        let key = key_of(&name);

        let Entry::Vacant(forward) = self.by_id.entry_sync(id) else {
            return false;
        };
        match self.by_name.entry_sync(key) {
            Entry::Occupied(owner) if *owner.get() != id => return false,
            Entry::Occupied(_) => {}
            Entry::Vacant(reverse) => {
                reverse.insert_entry(id);
            }
        }
        forward.insert_entry(name);
        true
    }

    /// Bulk-load stored names. Known identities and names already in use are left alone.
    pub fn warm(&self, names: impl IntoIterator<Item = (PlayerId, PlayerName)>) -> usize {
        names
            .into_iter()
            .filter(|(id, name)| self.insert_if_free(*id, *name))
            .count()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for NameIndex {
    fn default() -> Self {
        Self::new()
    }
}
