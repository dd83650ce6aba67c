//! Inference backends implementing the detector and classifier traits

#[cfg(feature = "backend-ort")]
pub mod onnx;
