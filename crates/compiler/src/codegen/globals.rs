//! String global deduplication.
//!
//! Continues the teacher's approach unchanged: escape the text once,
//! intern it behind a `@.str.N` global, and hand back the same global name
//! for repeat occurrences of an identical literal.

use super::CodeGen;
use crate::codegen::error::CodeGenError;
use std::fmt::Write as _;

impl CodeGen<'_> {
    pub(super) fn escape_llvm_string(s: &str) -> Result<String, std::fmt::Error> {
        let mut result = String::new();
        for byte in s.as_bytes() {
            match *byte {
                b' '..=b'!' | b'#'..=b'[' | b']'..=b'~' => result.push(*byte as char),
                b'\\' => result.push_str(r"\\"),
                b'"' => result.push_str(r#"\22"#),
                _ => {
                    write!(&mut result, r"\{:02X}", byte)?;
                }
            }
        }
        Ok(result)
    }

    pub(super) fn get_string_global(&mut self, s: &str) -> Result<String, CodeGenError> {
        if let Some(global_name) = self.string_constants.get(s) {
            return Ok(global_name.clone());
        }

        let global_name = format!("@.str.{}", self.string_counter);
        self.string_counter += 1;

        let escaped = Self::escape_llvm_string(s)?;
        let len = s.len() + 1;

        writeln!(
            &mut self.string_globals,
            "{global_name} = private unnamed_addr constant [{len} x i8] c\"{escaped}\\00\""
        )?;

        self.string_constants.insert(s.to_string(), global_name.clone());
        Ok(global_name)
    }
}
