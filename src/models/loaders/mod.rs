pub mod prompt_loader;

pub use prompt_loader::{builtin_prompt_store, load_prompt_store, parse_prompt_toml};
