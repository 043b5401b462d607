//! Overlay caption text for a detected face.

use crate::matcher::Matcher;
use crate::types::DetectionResult;

/// Caption shown when the face cannot be matched at all.
pub const UNKNOWN_CAPTION: &str = "Unknown";

/// Build the caption drawn above a face box, e.g.
/// `"Connor (0.41) | male (97%) | Age: 24"`.
///
/// Without a matcher or a descriptor on the face the caption is
/// [`UNKNOWN_CAPTION`].
pub fn face_caption(detection: &DetectionResult, matcher: Option<&dyn Matcher>) -> String {
    let (Some(matcher), Some(descriptor)) = (matcher, detection.descriptor.as_ref()) else {
        return UNKNOWN_CAPTION.to_string();
    };

    let best = matcher.find_best_match(descriptor);
    match detection.age_gender {
        Some(ag) => format!(
            "{best} | {} ({:.0}%) | Age: {}",
            ag.gender,
            ag.gender_probability * 100.0,
            ag.age.round() as i64
        ),
        None => best.to_string(),
    }
}
