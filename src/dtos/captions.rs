use serde::Serialize;

/// Successful upload response: the JPEG-normalized echo of the upload as a
/// data-URI, plus the generated caption.
#[derive(Debug, Serialize)]
pub struct CaptionResponse {
    pub success: bool,
    pub image: String,
    pub caption: String,
}
