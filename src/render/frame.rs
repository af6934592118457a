//! Frames and segments.
//!
//! A [`Frame`] is the value of a subtree at one suspension point: an ordered
//! run of text and, when a stop predicate is in force, opaque un-expanded
//! elements. Frames in cumulative mode grow monotonically; [`Frame::delta_from`]
//! extracts the append-only view.

use crate::error::{RenderError, RenderResult};
use crate::node::Element;

/// One run of rendered output.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Plain text.
    Text(String),
    /// An element left un-expanded by a stop predicate. Inspect its tag to
    /// decide further processing.
    Element(Element),
}

/// The current value of a subtree. Adjacent text runs are always merged, so
/// structurally different construction orders compare equal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    segments: Vec<Segment>,
}

impl Frame {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut frame = Self::empty();
        frame.push_text(&text.into());
        frame
    }

    pub fn element(element: Element) -> Self {
        Self {
            segments: vec![Segment::Element(element)],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    fn push_segment(&mut self, segment: Segment) {
        match segment {
            Segment::Text(text) => self.push_text(&text),
            Segment::Element(element) => self.segments.push(Segment::Element(element)),
        }
    }

    /// Append another frame, merging adjacent text runs.
    pub fn append(&mut self, other: &Frame) {
        for segment in &other.segments {
            self.push_segment(segment.clone());
        }
    }

    /// `self` followed by `other`, as a new frame.
    pub fn appended(&self, other: &Frame) -> Frame {
        let mut out = self.clone();
        out.append(other);
        out
    }

    /// Concatenated text of the frame. Fails with a user error when the frame
    /// holds opaque elements; those require the segment-level APIs.
    pub fn to_text(&self) -> RenderResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Element(element) => {
                    return Err(RenderError::user_input(format!(
                        "frame holds un-expanded element <{}>; use the segment APIs with stop predicates",
                        element.tag().name()
                    )))
                }
            }
        }
        Ok(out)
    }

    /// Prefix relation between frames: `self` is a prefix of `other` when
    /// `other` extends it with more output. The relation the monotone-frame
    /// guarantee is stated in.
    pub fn is_prefix_of(&self, other: &Frame) -> bool {
        if self.segments.is_empty() {
            return true;
        }
        if other.segments.len() < self.segments.len() {
            return false;
        }
        let last = self.segments.len() - 1;
        if self.segments[..last] != other.segments[..last] {
            return false;
        }
        match (&self.segments[last], &other.segments[last]) {
            (Segment::Text(prev), Segment::Text(next)) => next.starts_with(prev.as_str()),
            (prev, next) => prev == next,
        }
    }

    /// The suffix of `self` after `prev`. Falls back to the whole frame when
    /// `prev` is not a prefix, which only happens for producers violating the
    /// monotone discipline.
    pub fn delta_from(&self, prev: &Frame) -> Frame {
        if prev.segments.is_empty() {
            return self.clone();
        }
        if self.segments.len() < prev.segments.len() {
            return self.clone();
        }
        let last = prev.segments.len() - 1;
        if self.segments[..last] != prev.segments[..last] {
            return self.clone();
        }
        let mut out = Frame::empty();
        match (&prev.segments[last], &self.segments[last]) {
            (Segment::Text(prev_text), Segment::Text(next_text))
                if next_text.starts_with(prev_text.as_str()) =>
            {
                out.push_text(&next_text[prev_text.len()..]);
            }
            (prev_segment, next_segment) if prev_segment == next_segment => {}
            _ => return self.clone(),
        }
        for segment in &self.segments[last + 1..] {
            out.push_segment(segment.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_text_runs_merge() {
        let mut frame = Frame::text("ab");
        frame.append(&Frame::text("cd"));
        assert_eq!(frame.segments().len(), 1);
        assert_eq!(frame.to_text().expect("text"), "abcd");
    }

    #[test]
    fn test_empty_text_is_normalized_away() {
        assert!(Frame::text("").is_empty());
        assert_eq!(Frame::text(""), Frame::empty());
    }

    #[test]
    fn test_prefix_relation() {
        let a = Frame::text("ab");
        let ab = Frame::text("abcd");
        assert!(a.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
        assert!(Frame::empty().is_prefix_of(&a));
        assert!(a.is_prefix_of(&a));
    }

    #[test]
    fn test_prefix_relation_with_elements() {
        let element = Element::fragment("x");
        let mut stopped = Frame::text("before ");
        stopped.push_segment(Segment::Element(element.clone()));
        let mut longer = stopped.clone();
        longer.append(&Frame::text(" after"));
        assert!(stopped.is_prefix_of(&longer));
        assert!(!longer.is_prefix_of(&stopped));
    }

    #[test]
    fn test_delta_extraction() {
        let a = Frame::text("ab");
        let abc = Frame::text("abc");
        assert_eq!(abc.delta_from(&a).to_text().expect("text"), "c");
        assert_eq!(abc.delta_from(&Frame::empty()), abc);
        assert!(abc.delta_from(&abc).is_empty());
    }

    #[test]
    fn test_to_text_rejects_opaque_elements() {
        let frame = Frame::element(Element::fragment("x"));
        let err = frame.to_text().expect_err("opaque element");
        assert_eq!(err.code(), crate::error::ErrorCode::UserInput);
    }
}
