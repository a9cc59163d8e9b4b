#[macro_use]
extern crate num_derive;

use prelude::*;

pub mod auth;
pub mod codec;
pub mod collections;
pub mod entities;
pub mod events;
pub mod replica;
mod utils;

#[cfg(test)]
pub mod test_utils;

pub mod prelude {
    pub use std::collections::{HashMap, HashSet};

    pub use crate::*;
    pub use crate::entities::*;
    pub use crate::events::*;
    pub use crate::replica::*;
    #[cfg(test)]
    pub use crate::test_utils::*;
    pub use crate::utils::*;
}

//
// Entry points
//

/// Creates a replica with the default options (pin-aware chat ordering, no socket).
pub fn new_replica() -> Replica {
    Replica::new(ReplicaOptions::default())
}
