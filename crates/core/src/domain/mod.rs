pub mod product;
pub mod quote;

use serde::{Deserialize, Serialize};

/// Tenant account under which catalog, quotes, and counters are scoped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);
