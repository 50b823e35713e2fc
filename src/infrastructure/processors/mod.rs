// Processors module
pub mod asset_namer;
pub mod code_splitter;
pub mod css_processor;
pub mod framework_closure;
pub mod js_processor;

pub use asset_namer::*;
pub use code_splitter::*;
pub use css_processor::*;
pub use framework_closure::*;
pub use js_processor::*;
