pub mod collector;
pub mod discovery;
pub mod instance;
pub mod ranker;
pub mod sampler;
#[cfg(test)]
pub mod testing;
pub mod tunnel;
