//! Backend capabilities.
//!
//! Each backend advertises a fixed set of capabilities. Operations that
//! need a capability go through [`Capabilities::check`], which fails fast
//! with [`BackendError::NotSupported`] unless the capability is supported
//! natively or simulated.

use std::fmt;

use super::traits::{BackendError, Result};

/// A single optional backend feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Server-side message flags.
    Flags,
    /// Server-side move between folders.
    Move,
    /// Server-side copy between folders.
    Copy,
    /// Permanently removing messages marked as deleted.
    Expunge,
    /// Appending messages to a folder.
    Upload,
    /// A dedicated trash folder.
    TrashFolder,
    /// Searching by date range.
    SearchByDate,
    /// Folder subscriptions.
    FolderSubscriptions,
    /// Server push for new mail.
    Push,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Self::Flags,
        Self::Move,
        Self::Copy,
        Self::Expunge,
        Self::Upload,
        Self::TrashFolder,
        Self::SearchByDate,
        Self::FolderSubscriptions,
        Self::Push,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flags => "flags",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Expunge => "expunge",
            Self::Upload => "upload",
            Self::TrashFolder => "trash_folder",
            Self::SearchByDate => "search_by_date",
            Self::FolderSubscriptions => "folder_subscriptions",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of capabilities stored as a bitset.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// How a capability-guarded operation will be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// The backend performs the operation.
    Native,
    /// The backend performs a well-defined safe substitute, usually a no-op.
    Simulated,
}

/// Immutable capability description of a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    supported: CapabilitySet,
    simulated: CapabilitySet,
}

impl Capabilities {
    pub fn new(supported: CapabilitySet, simulated: CapabilitySet) -> Self {
        Self {
            supported,
            simulated,
        }
    }

    /// Capabilities supported natively, nothing simulated.
    pub fn supporting(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self::new(capabilities.into_iter().collect(), CapabilitySet::empty())
    }

    /// Adds capabilities the backend simulates.
    pub fn simulating(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.simulated = capabilities.into_iter().collect();
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.supported.contains(capability)
    }

    pub fn simulates(&self, capability: Capability) -> bool {
        !self.supports(capability) && self.simulated.contains(capability)
    }

    /// Guards an operation on `capability`.
    pub fn check(&self, capability: Capability, operation: &'static str) -> Result<Support> {
        if self.supports(capability) {
            Ok(Support::Native)
        } else if self.simulated.contains(capability) {
            Ok(Support::Simulated)
        } else {
            Err(BackendError::NotSupported { operation })
        }
    }

    pub fn supports_flags(&self) -> bool {
        self.supports(Capability::Flags)
    }

    pub fn supports_move(&self) -> bool {
        self.supports(Capability::Move)
    }

    pub fn supports_copy(&self) -> bool {
        self.supports(Capability::Copy)
    }

    pub fn supports_expunge(&self) -> bool {
        self.supports(Capability::Expunge)
    }

    pub fn supports_upload(&self) -> bool {
        self.supports(Capability::Upload)
    }

    pub fn supports_trash_folder(&self) -> bool {
        self.supports(Capability::TrashFolder)
    }

    pub fn supports_search_by_date(&self) -> bool {
        self.supports(Capability::SearchByDate)
    }

    pub fn supports_folder_subscriptions(&self) -> bool {
        self.supports(Capability::FolderSubscriptions)
    }

    pub fn is_push_capable(&self) -> bool {
        self.supports(Capability::Push)
    }
}
