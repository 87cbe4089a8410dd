//! Sequential mbox reader
//!
//! Messages are separated by postmark lines (`From <sender> <date>`) that sit
//! at the start of the file or directly after a blank line. A body line that
//! merely begins with `From ` but carries no time and year is not a postmark,
//! and `>From ` lines are escaped body text. Only each message's header block
//! is kept; body lines are read and discarded, so memory stays flat on
//! multi-gigabyte archives.

use std::io::{self, BufRead};

/// Yields the header block of each message in an mbox stream
pub struct MboxReader<R> {
    reader: R,
    line: Vec<u8>,
    /// Positioned just after a separator line
    in_message: bool,
    prev_blank: bool,
    at_start: bool,
}

impl<R: BufRead> MboxReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            in_message: false,
            prev_blank: false,
            at_start: true,
        }
    }

    fn read_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        Ok(self.reader.read_until(b'\n', &mut self.line)? > 0)
    }

    fn at_separator(&self) -> bool {
        (self.at_start || self.prev_blank) && is_postmark(&self.line)
    }

    /// Header bytes of the next message, or `None` at end of stream
    pub fn next_message(&mut self) -> io::Result<Option<Vec<u8>>> {
        while !self.in_message {
            if !self.read_line()? {
                return Ok(None);
            }
            if self.at_separator() {
                self.in_message = true;
            }
            self.at_start = false;
            self.prev_blank = is_blank(&self.line);
        }

        let mut header = Vec::new();
        let mut in_header = true;
        loop {
            if !self.read_line()? {
                self.in_message = false;
                return Ok(Some(header));
            }
            if self.at_separator() {
                self.prev_blank = false;
                return Ok(Some(header));
            }

            let blank = is_blank(&self.line);
            if in_header {
                if blank {
                    in_header = false;
                } else {
                    header.extend_from_slice(&self.line);
                }
            }
            self.prev_blank = blank;
        }
    }
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}

/// `From <sender> ... HH:MM[:SS] ... YYYY`, as written by mail delivery agents
fn is_postmark(line: &[u8]) -> bool {
    let Some(rest) = line.strip_prefix(b"From ") else {
        return false;
    };
    let rest = String::from_utf8_lossy(rest);
    let mut tokens = rest.split_whitespace();
    if tokens.next().is_none() {
        return false;
    }

    let mut has_time = false;
    let mut has_year = false;
    for token in tokens {
        let bytes = token.as_bytes();
        if bytes.len() == 4 && bytes.iter().all(u8::is_ascii_digit) {
            has_year = true;
        } else if token.split(':').count() >= 2
            && token.split(':').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
        {
            has_time = true;
        }
    }
    has_time && has_year
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn headers(mbox: &str) -> Vec<String> {
        MboxReader::new(Cursor::new(mbox.as_bytes().to_vec()))
            .map(|h| String::from_utf8(h.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_splits_messages_and_drops_bodies() {
        let mbox = "From a@x.com Sun Jun  1 12:00:00 2025\n\
From: a@x.com\n\
Subject: one\n\
\n\
body line\n\
\n\
From b@x.com Mon Jun  2 12:00:00 2025\n\
From: b@x.com\n\
\n\
second body\n";

        assert_eq!(
            headers(mbox),
            vec!["From: a@x.com\nSubject: one\n", "From: b@x.com\n"]
        );
    }

    #[test]
    fn test_from_inside_body_is_not_a_separator() {
        let mbox = "From a@x.com Sun Jun  1 12:00:00 2025\n\
From: a@x.com\n\
\n\
From the desk of the editor\n\
more text\n\
\n\
From what I heard: nothing\n";

        assert_eq!(headers(mbox), vec!["From: a@x.com\n"]);
    }

    #[test]
    fn test_escaped_from_is_body_text() {
        let mbox = "From a@x.com Sun Jun  1 12:00:00 2025\n\
From: a@x.com\n\
\n\
>From b@y.com Mon Jun  2 09:00:00 2025\n\
\n\
From c@z.com Tue Jun  3 09:00:00 2025\n\
From: c@z.com\n";

        assert_eq!(headers(mbox), vec!["From: a@x.com\n", "From: c@z.com\n"]);
    }

    #[test]
    fn test_postmark_detection() {
        assert!(is_postmark(b"From a@x.com Sun Jun  1 12:00:00 2025\n"));
        assert!(is_postmark(b"From 1798a@xxx Sat Jun 01 12:00:00 +0000 2025\r\n"));
        assert!(!is_postmark(b"From what I heard: nothing\n"));
        assert!(!is_postmark(b"From: a@x.com\n"));
        assert!(!is_postmark(b">From a@x.com Sun Jun  1 12:00:00 2025\n"));
    }

    #[test]
    fn test_crlf_and_empty_stream() {
        assert!(headers("").is_empty());
        let mbox = "From x Sun Jun  1 12:00:00 2025\r\nFrom: c@x.com\r\n\r\nbody\r\n";
        assert_eq!(headers(mbox), vec!["From: c@x.com\r\n"]);
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mbox = "not an mbox line\n\nFrom x Sun Jun  1 12:00:00 2025\nFrom: d@x.com\n";
        assert_eq!(headers(mbox), vec!["From: d@x.com\n"]);
    }
}
