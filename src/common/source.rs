/// A DEX-level source position: file id plus line number. Unlike the front
/// end's byte-offset `Span`, this is all the information that survives into
/// the post-register-allocation IR — there is no column and no end offset
/// because line tables are line-granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub file_id: u32,
    pub line: u32,
}

impl Position {
    pub fn new(file_id: u32, line: u32) -> Self {
        Self { file_id, line }
    }
}

/// Maps file ids to human-readable names, purely for diagnostic display.
///
/// The embedding compiler owns the real source manager; this crate never
/// reads source text, so this is reduced to the one thing a peephole
/// diagnostic still needs: turning a `Position`'s `file_id` back into a
/// filename a developer recognizes.
#[derive(Debug, Default)]
pub struct SourceManager {
    names: Vec<String>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    pub fn add_file(&mut self, name: impl Into<String>) -> u32 {
        let id = self.names.len() as u32;
        self.names.push(name.into());
        id
    }

    pub fn name(&self, file_id: u32) -> &str {
        self.names
            .get(file_id as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }
}
