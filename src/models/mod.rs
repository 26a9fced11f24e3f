pub mod tiny_gpt2;

pub use tiny_gpt2::{Gpt2Block, TinyGpt2, TinyGpt2Config};
