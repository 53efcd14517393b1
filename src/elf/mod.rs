pub mod raw;
pub mod sections;
pub mod view;

pub use sections::{SectionKind, SectionWrapper};
pub use view::ElfView;
