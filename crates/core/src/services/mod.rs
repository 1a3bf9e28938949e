pub mod branches;
pub mod correlate;
pub mod disasm;
pub mod elf;
pub mod lines;
pub mod pipeline;
pub mod report;
pub mod toolchain;
pub mod traces;
