pub mod manual_action_writer;
pub mod order_selector;
pub mod printing;

pub use manual_action_writer::ManualActionWriter;
pub use order_selector::{MatchPolicy, OrderSelector, Selection, SelectionError, MAX_SELECTIONS};
pub use printing::{CommandPrinter, DocumentPrinter, PrinterChain};
