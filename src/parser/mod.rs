mod lexer;
mod rewriter;
mod splitter;
mod variables;

pub use rewriter::{QueryRewriter, Rewrite};
pub use splitter::{SplitText, StatementSplitter, PIPE_MARKER};
pub use variables::{Expansion, PendingCapture, VariableEngine};
