//! Slide deck assembly and PPTX output.

pub mod deck;
pub mod pptx;

pub use deck::{AssemblerOptions, Deck, DeckAssembler, DeckInputs, Slide, SlideLayout};
pub use pptx::{render_pptx, write_pptx};
