pub mod canon;
pub mod config;
pub mod db;
pub mod depfile;
pub mod env;
pub mod file;
pub mod hash;
pub mod job;
pub mod pool;
pub mod process;
pub mod producer;
pub mod progress;
pub mod run;
pub mod trace;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
