use uuid::Uuid;

use super::graph::NodeId;

/// Role token carried in a generated node id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdRole {
    Root,
    Category,
    Detail,
    Topic,
}

impl IdRole {
    pub fn token(self) -> &'static str {
        match self {
            IdRole::Root => "root",
            IdRole::Category => "l1",
            IdRole::Detail => "l2",
            IdRole::Topic => "t",
        }
    }
}

/// Hands out session-unique node ids.
///
/// An id is `<role>-<local index path>-<n>-<uuid v7>`: the per-allocator
/// counter keeps ids from one allocator apart, the time-ordered uuid keeps
/// allocators apart.
#[derive(Debug, Default)]
pub struct IdAllocator {
    issued: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, role: IdRole, local: &[usize]) -> NodeId {
        self.issued += 1;
        let path = local
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("-");
        let uuid = Uuid::now_v7().simple();
        if path.is_empty() {
            format!("{}-{}-{}", role.token(), self.issued, uuid)
        } else {
            format!("{}-{}-{}-{}", role.token(), path, self.issued, uuid)
        }
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}
