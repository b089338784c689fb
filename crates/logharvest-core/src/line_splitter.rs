//! Reassembles raw byte chunks into complete lines.
//!
//! A line is complete only once its `\n` delimiter has been seen. The trailing
//! fragment of a chunk is kept until a later chunk completes it, so a line cut
//! at a chunk boundary comes out whole.

pub const LINE_BREAK: u8 = b'\n';

/// Per-source line reassembly buffer
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and iterate over the lines it completes.
    ///
    /// Lines left unconsumed when the iterator is dropped stay buffered and
    /// come out of the next `push`.
    pub fn push(&mut self, chunk: &[u8]) -> CompleteLines<'_> {
        self.buffer.extend_from_slice(chunk);
        CompleteLines {
            buffer: &mut self.buffer,
            start: 0,
        }
    }

    /// Bytes held back because no delimiter followed them yet
    pub fn fragment(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop the retained fragment
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Lazy iterator over the complete lines of a [`LineSplitter`]
pub struct CompleteLines<'a> {
    buffer: &'a mut Vec<u8>,
    start: usize,
}

impl Iterator for CompleteLines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let rest = &self.buffer[self.start..];
        let pos = rest.iter().position(|&b| b == LINE_BREAK)?;
        let line = rest[..pos].to_vec();
        self.start += pos + 1;
        Some(line)
    }
}

impl Drop for CompleteLines<'_> {
    fn drop(&mut self) {
        self.buffer.drain(..self.start);
    }
}

/// Split a whole buffer into lines.
///
/// The empty piece after a final delimiter is dropped, so `"a\nb\n"` and
/// `"a\nb"` both give `["a", "b"]`. Empty input gives no lines.
pub fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = bytes.split(|&b| b == LINE_BREAK).collect();
    if lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(splitter: &mut LineSplitter, chunk: &[u8]) -> Vec<String> {
        splitter
            .push(chunk)
            .map(|line| String::from_utf8(line).unwrap())
            .collect()
    }

    #[test]
    fn test_fragment_is_held_back() {
        let mut splitter = LineSplitter::new();
        assert_eq!(collect(&mut splitter, b"alpha\nbeta\nga"), vec!["alpha", "beta"]);
        assert_eq!(splitter.fragment(), b"ga");

        assert_eq!(collect(&mut splitter, b"mma\n"), vec!["gamma"]);
        assert!(splitter.fragment().is_empty());
    }

    #[test]
    fn test_chunk_without_delimiter_emits_nothing() {
        let mut splitter = LineSplitter::new();
        assert!(collect(&mut splitter, b"no newline").is_empty());
        assert!(collect(&mut splitter, b" yet").is_empty());
        assert_eq!(collect(&mut splitter, b"\n"), vec!["no newline yet"]);
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let mut splitter = LineSplitter::new();
        assert_eq!(collect(&mut splitter, b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn test_carriage_return_is_not_stripped() {
        let mut splitter = LineSplitter::new();
        assert_eq!(collect(&mut splitter, b"dos\r\n"), vec!["dos\r"]);
    }

    #[test]
    fn test_unconsumed_lines_survive() {
        let mut splitter = LineSplitter::new();
        {
            let mut lines = splitter.push(b"one\ntwo\nthr");
            assert_eq!(lines.next().unwrap(), b"one");
        }
        assert_eq!(collect(&mut splitter, b"ee\n"), vec!["two", "three"]);
    }

    #[test]
    fn test_reset_drops_fragment() {
        let mut splitter = LineSplitter::new();
        assert!(collect(&mut splitter, b"stale").is_empty());
        splitter.reset();
        assert_eq!(collect(&mut splitter, b"fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "naïve café\n".as_bytes();
        let mut splitter = LineSplitter::new();
        let mut lines = Vec::new();
        for byte in bytes {
            lines.extend(splitter.push(std::slice::from_ref(byte)));
        }
        assert_eq!(lines.len(), 1);
        assert_eq!(String::from_utf8(lines.remove(0)).unwrap(), "naïve café");
    }

    #[test]
    fn test_any_partition_matches_whole_split() {
        let input: &[u8] = b"first line\nsecond\n\nfourth has more text\nfifth\ntrailing";
        let expected: Vec<Vec<u8>> = {
            let mut all: Vec<Vec<u8>> = input.split(|&b| b == LINE_BREAK).map(|l| l.to_vec()).collect();
            all.pop(); // trailing fragment is never emitted
            all
        };

        // Every chunk size, plus an uneven pattern of cut points
        let mut partitions: Vec<Vec<usize>> = (1..=input.len())
            .map(|size| (size..input.len()).step_by(size).collect())
            .collect();
        partitions.push(vec![1, 2, 10, 11, 12, 30, 41, 42, 50]);

        for cuts in partitions {
            let mut splitter = LineSplitter::new();
            let mut lines = Vec::new();
            let mut prev = 0;
            for cut in cuts.into_iter().chain(std::iter::once(input.len())) {
                lines.extend(splitter.push(&input[prev..cut]));
                prev = cut;
            }
            assert_eq!(lines, expected);
            assert_eq!(splitter.fragment(), b"trailing");
        }
    }

    #[test]
    fn test_split_lines() {
        let abc = vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()];
        assert_eq!(split_lines(b"a\nb\nc\n"), abc);
        assert_eq!(split_lines(b"a\nb\nc"), abc);
        assert_eq!(
            split_lines(b"a\n\nb\n"),
            vec![b"a".as_slice(), b"".as_slice(), b"b".as_slice()]
        );
        assert!(split_lines(b"").is_empty());
        assert_eq!(split_lines(b"\n"), vec![b"".as_slice()]);
    }
}
