//! Identity-preserving face swap (ReActor extension of the local diffusion server).
//!
//! Two entry points share one settings block: the `alwayson_scripts.reactor` argument list
//! embedded in txt2img, and the standalone `/reactor/image` pass for images that came from
//! somewhere else (cloud render, edit, extracted frame).

use serde_json::{json, Value};
use std::path::Path;

/// Source selection: ReActor picks a random face from a folder.
const SELECT_SOURCE_FOLDER: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceSwapSettings {
    pub model_path: String,
    pub restorer: String,
    pub codeformer_weight: f32,
    pub detection_threshold: f32,
    pub max_faces: u32,
    pub device: String,
}

impl FaceSwapSettings {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            restorer: "CodeFormer".to_string(),
            codeformer_weight: 0.5,
            detection_threshold: 0.6,
            max_faces: 2,
            device: "CUDA".to_string(),
        }
    }

    /// Positional args for `alwayson_scripts.reactor` in a txt2img payload.
    pub fn alwayson_args(&self, source_folder: &Path) -> Vec<Value> {
        vec![
            Value::Null,                        // source image (unused with a folder)
            json!(true),                        // enable
            json!("0"),                         // source face index
            json!("0"),                         // target face index
            json!(self.model_path),
            json!(self.restorer),
            json!(1),                           // restore visibility
            json!(true),                        // restore face before upscale
            json!("None"),                      // upscaler
            json!(1.5),                         // upscaler scale
            json!(1),                           // upscaler visibility
            json!(false),                       // swap in source image
            json!(true),                        // swap in generated image
            json!(1),                           // console log level
            json!(0),                           // gender detection (source)
            json!(0),                           // gender detection (target)
            json!(false),                       // save original
            json!(self.codeformer_weight),
            json!(false),                       // source hash check
            json!(false),                       // target hash check
            json!(self.device),
            json!(true),                        // face mask correction
            json!(SELECT_SOURCE_FOLDER),
            json!("None"),                      // face model
            json!(source_folder.to_string_lossy()),
            Value::Null,                        // multiple source images
            json!(true),                        // random image from folder
            json!(true),                        // force upscale
            json!(self.detection_threshold),
            json!(self.max_faces),
        ]
    }

    /// Body for `POST /reactor/image`.
    pub fn image_request(&self, target_base64: &str, source_folder: &Path) -> Value {
        json!({
            "source_image": "",
            "target_image": target_base64,
            "source_faces_index": [0],
            "face_index": [0],
            "upscaler": "None",
            "scale": 1,
            "upscale_visibility": 1,
            "face_restorer": self.restorer,
            "restorer_visibility": 1,
            "codeformer_weight": self.codeformer_weight,
            "restore_first": 1,
            "model": self.model_path,
            "gender_source": 0,
            "gender_target": 0,
            "save_to_file": 0,
            "device": self.device,
            "mask_face": 1,
            "select_source": SELECT_SOURCE_FOLDER,
            "face_model": "None",
            "source_folder": source_folder.to_string_lossy(),
            "random_image": 1,
            "upscale_force": 1,
            "det_thresh": self.detection_threshold,
            "det_maxnum": self.max_faces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alwayson_args_carry_folder_and_threshold() {
        let settings = FaceSwapSettings::new("models/insightface/inswapper_128.onnx");
        let args = settings.alwayson_args(Path::new("/faces/alpha"));
        assert_eq!(args[1], json!(true));
        assert_eq!(args[4], json!("models/insightface/inswapper_128.onnx"));
        assert_eq!(args[22], json!(2));
        assert_eq!(args[24], json!("/faces/alpha"));
        assert!((args[28].as_f64().unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn image_request_targets_given_picture() {
        let body = FaceSwapSettings::new("m.onnx").image_request("aGk=", Path::new("/faces"));
        assert_eq!(body["target_image"], "aGk=");
        assert_eq!(body["source_folder"], "/faces");
        assert_eq!(body["select_source"], 2);
    }
}
