pub mod traits;
pub mod pool;
pub mod linear;

pub use traits::StrategyEvaluator;
pub use pool::StrategyPool;
pub use linear::LinearValueEvaluator;
