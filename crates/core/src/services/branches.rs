//! Branch coverage recovered from source text.
//!
//! No compiler branch map is available, so `if`/`else if` and `switch`
//! statements are found by re-reading the source and their arms are delimited
//! by brace, `else` and `case` scanning. Each arm is covered when any source
//! line inside it is covered in the model. This is a heuristic: braces inside
//! multi-line comments or macros can mislead it, and a detected branch is only
//! kept when its line carries a control-transfer instruction.

use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::model::SourceFileCoverage;

fn if_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s+(?:\}\s*)?(?:else\s+)?if\s*\(").expect("static if pattern")
    })
}

fn switch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s+switch\s*\(").expect("static switch pattern"))
}

fn else_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\belse\b").expect("static else pattern"))
}

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?:case\b[^:]*:|default\s*:)").expect("static label pattern")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    If,
    Switch,
}

/// A conditional construct and the coverage of each of its arms, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPoint {
    pub line: u32,
    pub kind: BranchKind,
    pub arms: Vec<bool>,
}

impl BranchPoint {
    pub fn covered_arms(&self) -> usize {
        self.arms.iter().filter(|c| **c).count()
    }
}

/// Blank out comments and string/char literal contents, keeping columns.
/// The result is ASCII so byte offsets equal columns.
pub fn mask_line(line: &str) -> String {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        Str(char),
        Comment,
    }
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut mode = Mode::Code;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match mode {
            Mode::Code => {
                if c == '/' && next == Some('/') {
                    out.extend(std::iter::repeat(' ').take(chars.len() - i));
                    break;
                } else if c == '/' && next == Some('*') {
                    out.push_str("  ");
                    i += 2;
                    mode = Mode::Comment;
                    continue;
                } else if c == '"' || c == '\'' {
                    out.push(c);
                    mode = Mode::Str(c);
                } else {
                    out.push(if c.is_ascii() { c } else { ' ' });
                }
            }
            Mode::Str(quote) => {
                if c == '\\' && next.is_some() {
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if c == quote {
                    out.push(c);
                    mode = Mode::Code;
                } else {
                    out.push(' ');
                }
            }
            Mode::Comment => {
                if c == '*' && next == Some('/') {
                    out.push_str("  ");
                    i += 2;
                    mode = Mode::Code;
                    continue;
                }
                out.push(' ');
            }
        }
        i += 1;
    }
    out
}

/// Position inside the source: 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    pub line: u32,
    pub col: usize,
}

impl Pos {
    fn new(line: u32, col: usize) -> Self {
        Self { line, col }
    }
}

/// Why a construct could not be delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    UnterminatedCondition,
    UnterminatedBlock,
    UnterminatedStatement,
    MissingSwitchBody,
}

impl ScanFailure {
    fn describe(self) -> &'static str {
        match self {
            ScanFailure::UnterminatedCondition => "condition parentheses never close",
            ScanFailure::UnterminatedBlock => "block braces never close",
            ScanFailure::UnterminatedStatement => "statement has no terminating ';'",
            ScanFailure::MissingSwitchBody => "switch has no braced body",
        }
    }
}

/// Immutable, 1-indexed view of a source file with comments and literals masked.
#[derive(Debug, Clone)]
pub struct SourceText {
    lines: Vec<String>,
}

impl SourceText {
    pub fn new(text: &str) -> Self {
        Self { lines: text.lines().map(mask_line).collect() }
    }

    pub fn len(&self) -> u32 {
        self.lines.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Masked text of line `n` (1-based).
    pub fn line(&self, n: u32) -> Option<&str> {
        if n == 0 {
            return None;
        }
        self.lines.get(n as usize - 1).map(String::as_str)
    }

    /// Text of line `pos.line` from `pos.col` on.
    fn rest(&self, pos: Pos) -> &str {
        self.line(pos.line).map(|l| l.get(pos.col..).unwrap_or("")).unwrap_or("")
    }

    /// Position just after the `)` closing the first `(` at or after `from`.
    fn condition_end(&self, from: Pos) -> Result<Pos, ScanFailure> {
        let mut depth = 0usize;
        let mut opened = false;
        let mut pos = from;
        while let Some(text) = self.line(pos.line) {
            for (col, c) in text.char_indices().skip_while(|(col, _)| *col < pos.col) {
                match c {
                    '(' => {
                        depth += 1;
                        opened = true;
                    }
                    ')' if opened => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return Ok(Pos::new(pos.line, col + 1));
                        }
                    }
                    _ => {}
                }
            }
            pos = Pos::new(pos.line + 1, 0);
        }
        Err(ScanFailure::UnterminatedCondition)
    }

    /// First non-whitespace character at or after `from`.
    fn next_token(&self, from: Pos) -> Option<(Pos, char)> {
        let mut pos = from;
        while let Some(text) = self.line(pos.line) {
            if let Some((col, c)) =
                text.char_indices().skip_while(|(col, _)| *col < pos.col).find(|(_, c)| !c.is_whitespace())
            {
                return Some((Pos::new(pos.line, col), c));
            }
            pos = Pos::new(pos.line + 1, 0);
        }
        None
    }

    /// Position of the `}` matching the `{` at `open`.
    fn block_end(&self, open: Pos) -> Result<Pos, ScanFailure> {
        let mut depth = 0usize;
        let mut pos = open;
        while let Some(text) = self.line(pos.line) {
            for (col, c) in text.char_indices().skip_while(|(col, _)| *col < pos.col) {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return Ok(Pos::new(pos.line, col));
                        }
                    }
                    _ => {}
                }
            }
            pos = Pos::new(pos.line + 1, 0);
        }
        Err(ScanFailure::UnterminatedBlock)
    }

    /// Position of the `;` ending the statement that starts at `start`.
    fn statement_end(&self, start: Pos) -> Result<Pos, ScanFailure> {
        let mut parens = 0usize;
        let mut pos = start;
        while let Some(text) = self.line(pos.line) {
            for (col, c) in text.char_indices().skip_while(|(col, _)| *col < pos.col) {
                match c {
                    '(' => parens += 1,
                    ')' => parens = parens.saturating_sub(1),
                    ';' if parens == 0 => return Ok(Pos::new(pos.line, col)),
                    _ => {}
                }
            }
            pos = Pos::new(pos.line + 1, 0);
        }
        Err(ScanFailure::UnterminatedStatement)
    }
}

/// Scanner state while delimiting the two arms of an `if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfState {
    SeekConditionEnd,
    SeekTrueArmEnd { cond_end: Pos },
    SeekElse { true_end: Pos, true_covered: bool },
    SeekFalseArmEnd { else_end: Pos, true_covered: bool },
    Done { true_covered: bool, false_covered: bool },
}

/// Branch analysis for one source file against its model entry.
pub struct BranchHeuristicAnalyzer<'a> {
    file: &'a str,
    text: SourceText,
    coverage: &'a SourceFileCoverage,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> BranchHeuristicAnalyzer<'a> {
    pub fn new(file: &'a str, source: &str, coverage: &'a SourceFileCoverage) -> Self {
        Self { file, text: SourceText::new(source), coverage, diagnostics: Vec::new() }
    }

    /// Lines that look like an `if`/`else if` or a `switch`, in source order.
    pub fn detect(&self) -> Vec<(u32, BranchKind)> {
        (1..=self.text.len())
            .filter_map(|n| {
                let line = self.text.line(n)?;
                if if_pattern().is_match(line) {
                    Some((n, BranchKind::If))
                } else if switch_pattern().is_match(line) {
                    Some((n, BranchKind::Switch))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Analyse every detected construct. Dropped constructs are recorded as diagnostics.
    pub fn analyze(mut self) -> (Vec<BranchPoint>, Vec<Diagnostic>) {
        let mut points = Vec::new();
        for (line, kind) in self.detect() {
            if !self.passes_sanity_check(line) {
                let message = format!(
                    "line {line} looks like {} but no branch instruction was recorded for it",
                    match kind {
                        BranchKind::If => "an 'if'",
                        BranchKind::Switch => "a 'switch'",
                    }
                );
                warn!("{}:{line}: {message}", self.file);
                self.diagnostics.push(Diagnostic::new(
                    self.file,
                    Some(line),
                    DiagnosticKind::BranchSanityMismatch,
                    message,
                ));
                continue;
            }
            let arms = match kind {
                BranchKind::If => self.if_arms(line).map(|[t, f]| vec![t, f]),
                BranchKind::Switch => self.switch_arms(line),
            };
            match arms {
                Ok(arms) => points.push(BranchPoint { line, kind, arms }),
                Err(failure) => {
                    debug!("{}:{line}: dropping branch, {}", self.file, failure.describe());
                    self.diagnostics.push(Diagnostic::new(
                        self.file,
                        Some(line),
                        DiagnosticKind::UnterminatedConstruct,
                        failure.describe(),
                    ));
                }
            }
        }
        (points, self.diagnostics)
    }

    /// The line must carry at least one control-transfer instruction.
    fn passes_sanity_check(&self, line: u32) -> bool {
        self.coverage
            .lines
            .get(&line)
            .map(|l| l.opcodes().filter_map(mnemonic).any(is_control_transfer))
            .unwrap_or(false)
    }

    fn covered(&self, line: u32) -> bool {
        self.coverage.is_line_covered(line)
    }

    fn any_covered(&self, first: u32, last: u32) -> bool {
        first <= last && (first..=last).any(|n| self.covered(n))
    }

    /// Coverage and end position of the arm that starts right after `after`.
    ///
    /// Braced arm: covered when any line strictly between the braces is
    /// covered (or the single line when both braces share it). Brace-less arm:
    /// the line on which the following statement starts.
    fn arm(&self, after: Pos) -> Result<(bool, Pos), ScanFailure> {
        let Some((start, c)) = self.text.next_token(after) else {
            return Err(ScanFailure::UnterminatedStatement);
        };
        if c == '{' && start.line <= after.line + 1 {
            let close = self.text.block_end(start)?;
            let covered = if close.line == start.line {
                self.covered(start.line)
            } else {
                let code_before_close = self
                    .text
                    .line(close.line)
                    .map(|l| !l[..close.col].trim().is_empty())
                    .unwrap_or(false);
                let last = if code_before_close { close.line } else { close.line - 1 };
                self.any_covered(start.line + 1, last)
            };
            return Ok((covered, Pos::new(close.line, close.col + 1)));
        }
        let end = self.text.statement_end(start)?;
        Ok((self.covered(start.line), Pos::new(end.line, end.col + 1)))
    }

    /// Look for `else` in the rest of the true arm's last line and the line after it.
    fn find_else(&self, true_end: Pos) -> Option<Pos> {
        if let Some(m) = else_pattern().find(self.text.rest(true_end)) {
            return Some(Pos::new(true_end.line, true_end.col + m.end()));
        }
        let next = true_end.line + 1;
        let text = self.text.line(next)?;
        else_pattern().find(text).map(|m| Pos::new(next, m.end()))
    }

    /// `[true arm covered, false arm covered]` for the `if` on `line`.
    pub fn if_arms(&self, line: u32) -> Result<[bool; 2], ScanFailure> {
        let mut state = IfState::SeekConditionEnd;
        loop {
            state = match state {
                IfState::SeekConditionEnd => {
                    let cond_end = self.text.condition_end(Pos::new(line, 0))?;
                    IfState::SeekTrueArmEnd { cond_end }
                }
                IfState::SeekTrueArmEnd { cond_end } => {
                    let (true_covered, true_end) = self.arm(cond_end)?;
                    IfState::SeekElse { true_end, true_covered }
                }
                IfState::SeekElse { true_end, true_covered } => match self.find_else(true_end) {
                    Some(else_end) => IfState::SeekFalseArmEnd { else_end, true_covered },
                    // No else: falling through is itself the second outcome.
                    None => IfState::Done { true_covered, false_covered: true },
                },
                IfState::SeekFalseArmEnd { else_end, true_covered } => {
                    let (false_covered, _) = self.arm(else_end)?;
                    IfState::Done { true_covered, false_covered }
                }
                IfState::Done { true_covered, false_covered } => {
                    return Ok([true_covered, false_covered]);
                }
            };
        }
    }

    /// One coverage flag per `case`/`default` label of the `switch` on `line`.
    pub fn switch_arms(&self, line: u32) -> Result<Vec<bool>, ScanFailure> {
        let cond_end = self.text.condition_end(Pos::new(line, 0))?;
        let Some((open, '{')) = self.text.next_token(cond_end) else {
            return Err(ScanFailure::MissingSwitchBody);
        };

        let mut arms: Vec<bool> = Vec::new();
        let mut depth = 1usize;
        let mut pos = Pos::new(open.line, open.col + 1);
        while let Some(text) = self.text.line(pos.line) {
            let segment = text.get(pos.col..).unwrap_or("");
            if depth == 1 {
                if let Some(m) = label_pattern().find(segment) {
                    let has_statement = !segment[m.end()..].trim().is_empty();
                    arms.push(has_statement && self.covered(pos.line));
                } else if let Some(arm) = arms.last_mut() {
                    *arm |= self.covered(pos.line);
                }
            } else if let Some(arm) = arms.last_mut() {
                *arm |= self.covered(pos.line);
            }

            for c in segment.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(arms);
                        }
                    }
                    _ => {}
                }
            }
            pos = Pos::new(pos.line + 1, 0);
        }
        Err(ScanFailure::UnterminatedBlock)
    }
}

/// Mnemonic of an opcode text such as `d10043ff \tb.ne\t1040 <foo+0x40>`.
pub fn mnemonic(opcode: &str) -> Option<&str> {
    let mut fields = opcode.split('\t');
    fields.next()?;
    fields.map(str::trim).find(|f| !f.is_empty())?.split_whitespace().next()
}

const CONDITION_CODES: &[&str] = &[
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
    "al",
];

/// Branch, compare-and-branch and test-and-branch mnemonics.
pub fn is_control_transfer(mnemonic: &str) -> bool {
    let lower = mnemonic.to_ascii_lowercase();
    let m = lower.trim_end_matches(".w").trim_end_matches(".n");
    match m {
        "b" | "bl" | "blr" | "br" | "bx" | "blx" | "cbz" | "cbnz" | "tbz" | "tbnz" => true,
        "beqz" | "bnez" | "bltu" | "bgeu" | "blez" | "bgez" | "bltz" | "bgtz" => true,
        _ if m.starts_with("b.") => true,
        _ if m.starts_with('j') => true,
        // Conditional ARM forms: `bne`, `blt`, `bleq`, `bxeq`.
        _ => ["bl", "bx", "b"].iter().any(|prefix| {
            m.strip_prefix(prefix).map(|cond| CONDITION_CODES.contains(&cond)).unwrap_or(false)
        }),
    }
}
