// inclusion facility

pub use crate::error::*;

pub use crate::relation::*;

pub use crate::automaton::*;

pub use crate::sampler::*;

pub use crate::aggregate::*;

pub use crate::confusion::*;

pub use crate::tolerance::*;
