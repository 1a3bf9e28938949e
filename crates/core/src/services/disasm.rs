//! Parser for disassembly interleaved with source attribution (`objdump -Sl`).
//!
//! ```text
//! 0000000000001000 <foo>:
//! foo():
//! /work/src/foo.c:10
//!     int x = 0;
//!     1000:	d10043ff 	sub	sp, sp, #0x10
//! inlined_helper():
//! /work/include/helper.h:4 (discriminator 2)
//!     1004:	b9000fe0 	str	w0, [sp, #12]
//! ```
//!
//! Lines that are none of header, function marker, location or instruction
//! (interleaved source text, blank lines) are ignored.

/// One disassembled instruction; `opcode` keeps the text after `<address>:\t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    pub opcode: String,
}

/// Instructions attributed to one `(file, line)` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRun {
    /// Function named right before the location line, if any.
    pub function: Option<String>,
    pub file: String,
    pub line: u32,
    pub instructions: Vec<Instruction>,
}

/// A `<address> <label>:` block and everything up to the next block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBlock {
    pub address: u64,
    pub label: String,
    pub runs: Vec<SourceRun>,
    /// Instructions that appeared before any location line.
    pub unattributed: Vec<Instruction>,
}

impl FunctionBlock {
    fn new(address: u64, label: String) -> Self {
        Self { address, label, runs: Vec::new(), unattributed: Vec::new() }
    }

    pub fn has_source_attribution(&self) -> bool {
        !self.runs.is_empty()
    }

    /// Runs paired with their owning function. A run without an explicit name
    /// belongs to the most recently named function of the block, starting with
    /// the block's own label.
    pub fn resolved_runs(&self) -> Vec<(&str, &SourceRun)> {
        let mut current = self.label.as_str();
        self.runs
            .iter()
            .map(|run| {
                if let Some(name) = run.function.as_deref() {
                    current = name;
                }
                (current, run)
            })
            .collect()
    }

    /// The first run attributed to the block's own function.
    pub fn home_run(&self) -> Option<&SourceRun> {
        self.resolved_runs().into_iter().find(|(name, _)| *name == self.label).map(|(_, run)| run)
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

fn parse_header(line: &str) -> Option<(u64, String)> {
    let body = line.strip_suffix(">:")?;
    let (addr, label) = body.split_once(" <")?;
    if !is_hex(addr) || label.is_empty() {
        return None;
    }
    Some((u64::from_str_radix(addr, 16).ok()?, label.to_string()))
}

fn parse_function_marker(line: &str) -> Option<&str> {
    let name = line.strip_suffix("():")?;
    (!name.is_empty() && name.chars().all(is_symbol_char)).then_some(name)
}

fn parse_location(line: &str) -> Option<(String, u32)> {
    if !line.starts_with('/') {
        return None;
    }
    let line = match line.find(" (discriminator") {
        Some(idx) if line.ends_with(')') => &line[..idx],
        _ => line,
    };
    let (file, number) = line.rsplit_once(':')?;
    if file.is_empty() || number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((file.to_string(), number.parse().ok()?))
}

fn parse_instruction(line: &str) -> Option<Instruction> {
    // objdump pads short addresses with spaces; full-width ones are flush left.
    let (addr, rest) = line.trim_start().split_once(":\t")?;
    if !is_hex(addr) {
        return None;
    }
    Some(Instruction { address: u64::from_str_radix(addr, 16).ok()?, opcode: rest.to_string() })
}

/// Split a full transcript into function blocks.
pub fn parse_disassembly(text: &str) -> Vec<FunctionBlock> {
    let mut blocks: Vec<FunctionBlock> = Vec::new();
    let mut pending_function: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');
        if let Some((address, label)) = parse_header(line) {
            blocks.push(FunctionBlock::new(address, label));
            pending_function = None;
            continue;
        }
        let Some(block) = blocks.last_mut() else { continue };
        if let Some(name) = parse_function_marker(line) {
            pending_function = Some(name.to_string());
        } else if let Some((file, number)) = parse_location(line) {
            block.runs.push(SourceRun {
                function: pending_function.take(),
                file,
                line: number,
                instructions: Vec::new(),
            });
        } else if let Some(insn) = parse_instruction(line) {
            match block.runs.last_mut() {
                Some(run) => run.instructions.push(insn),
                None => block.unattributed.push(insn),
            }
        }
    }
    blocks
}
