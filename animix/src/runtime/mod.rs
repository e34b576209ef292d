mod animation_state;
mod skeleton;
mod timeline;

pub use animation_state::*;
pub use skeleton::*;
pub use timeline::{MixBlend, MixDirection};

#[cfg(test)]
mod animation_state_tests;
