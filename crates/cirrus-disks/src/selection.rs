//! Operator input to the allocator, already resolved by whatever front end
//! asked the questions.

/// One disk on one peer, addressed by its stable device path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiskRef {
    pub peer: String,
    pub path: String,
}

impl DiskRef {
    pub fn new(peer: impl Into<String>, path: impl Into<String>) -> Self {
        Self { peer: peer.into(), path: path.into() }
    }
}

/// The operator's answer for one pool role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolChoice {
    /// `false` when the operator declined this pool entirely.
    pub wanted: bool,
    pub selected: Vec<DiskRef>,
    /// Disks to wipe; must be a subset of `selected`.
    pub wipe: Vec<DiskRef>,
}

impl PoolChoice {
    pub fn declined() -> Self {
        Self::default()
    }

    pub fn select(selected: Vec<DiskRef>) -> Self {
        Self { wanted: true, selected, wipe: Vec::new() }
    }

    pub fn with_wipe(mut self, wipe: Vec<DiskRef>) -> Self {
        self.wipe = wipe;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupMode {
    /// Non-interactive: take defaults everywhere.
    Auto,
    Interactive { local: PoolChoice, distributed: PoolChoice },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOptions {
    pub mode: SetupMode,
    /// Wipe every selected disk regardless of per-disk choices.
    pub wipe_all: bool,
    /// `true` when forming a new cluster, `false` when peers join an existing one.
    pub bootstrap: bool,
    /// Whether the distributed storage service takes part at all.
    pub distributed: bool,
}

impl AllocationOptions {
    pub fn auto(bootstrap: bool) -> Self {
        Self { mode: SetupMode::Auto, wipe_all: false, bootstrap, distributed: true }
    }

    pub fn interactive(local: PoolChoice, distributed: PoolChoice, bootstrap: bool) -> Self {
        Self {
            mode: SetupMode::Interactive { local, distributed },
            wipe_all: false,
            bootstrap,
            distributed: true,
        }
    }
}
