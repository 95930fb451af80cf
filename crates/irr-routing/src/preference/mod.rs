//! Route preference between registries

pub mod radix;
pub mod resolver;

pub use radix::RadixTree;
pub use resolver::{PreferenceDeltas, RoutePreferenceResolver};
