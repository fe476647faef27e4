use std::fmt;

/// Kind of a labelled run inside a markup summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Keyword,
    String,
    Number,
    Comment,
    Value,
}

impl Run {
    fn label(self) -> char {
        match self {
            Self::Keyword => 'K',
            Self::String => 'S',
            Self::Number => 'N',
            Self::Comment => 'C',
            Self::Value => 'V',
        }
    }
}

const SENTINEL: char = '\u{fe}';

/// Output buffer a summary is rendered into. Carries the pointer width of
/// the target, the running output length, and the current summary nesting
/// level. With markup enabled, classified runs are wrapped in sentinel
/// bytes the IDE turns into syntax colors.
#[derive(Debug, Clone)]
pub struct Stream {
    buffer: String,
    is64bit: bool,
    markup: bool,
    /// Total characters written, across nesting.
    pub length: usize,
    /// Current summary recursion level.
    pub level: usize,
}

impl Stream {
    #[must_use]
    pub fn new(is64bit: bool, markup: bool, initial_level: usize) -> Self {
        Self {
            buffer: String::new(),
            is64bit,
            markup,
            length: 0,
            level: initial_level,
        }
    }

    /// A fresh stream sharing this stream's pointer width, markup mode,
    /// running length and level.
    #[must_use]
    pub fn create_nested(&self) -> Self {
        Self {
            buffer: String::new(),
            is64bit: self.is64bit,
            markup: self.markup,
            length: self.length,
            level: self.level,
        }
    }

    pub fn output(&mut self, text: &str) {
        self.length += text.chars().count();
        self.buffer.push_str(text);
    }

    fn output_run(&mut self, run: Run, text: &str) {
        if self.markup {
            self.buffer.push(SENTINEL);
            self.buffer.push(run.label());
            self.output(text);
            self.buffer.push(SENTINEL);
            self.buffer.push('E');
        } else {
            self.output(text);
        }
    }

    pub fn output_keyword(&mut self, text: &str) {
        self.output_run(Run::Keyword, text);
    }

    pub fn output_string(&mut self, text: &str) {
        self.output_run(Run::String, text);
    }

    pub fn output_number(&mut self, text: &str) {
        self.output_run(Run::Number, text);
    }

    pub fn output_comment(&mut self, text: &str) {
        self.output_run(Run::Comment, text);
    }

    pub fn output_value(&mut self, text: &str) {
        self.output_run(Run::Value, text);
    }

    pub fn output_address(&mut self, address: u64) {
        let text = if self.is64bit {
            format!("0x{address:016x}")
        } else {
            format!("0x{address:08x}")
        };
        self.output_comment(&text);
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}
