pub mod citations;
pub mod generator;
pub mod prompts;
pub mod stream;

pub use citations::{CitationRegistry, ValidationReport, DEFAULT_MAX_SNIPPET_LENGTH};
pub use generator::Generator;
pub use prompts::{PromptAssembler, PromptVariant};
pub use stream::{StreamMultiplexer, DEFAULT_CHANNEL_CAPACITY};
