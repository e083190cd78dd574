pub mod candle;
pub mod instrument;
pub mod signal;

pub use candle::Candle;
pub use instrument::Instrument;
pub use signal::{AiVerdict, AnalysisDepth, Direction, ScanMode, Signal, TechnicalSnapshot};
