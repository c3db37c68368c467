//! Wire types for the `generateContent` call. Serialization is camelCase to
//! match the upstream surface; response types keep only the fields we read.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub aspect_ratio: String,
    pub image_size: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A reference image already normalized to inline form.
#[derive(Debug, Clone)]
pub struct RefImage {
    pub mime_type: String,
    pub data_base64: String,
}

const REF_LABELS: [(&str, &str, &str); 2] = [
    ("#1", "图一", "the primary subject reference; keep its subject identity"),
    ("#2", "图二", "the style and composition reference; take cues from it without copying its subject"),
];

fn primer(aspect_ratio: &str, image_size: &str, ref_count: usize) -> String {
    let mut s = format!(
        "Generate exactly one image, returned as inline image/png data. \
         Target aspect ratio {aspect_ratio}, target output size {image_size}."
    );
    for (num, cn, role) in REF_LABELS.iter().take(ref_count) {
        s.push_str(&format!(" Reference Image {num} ({cn}) is {role}."));
    }
    s
}

pub fn build_request(
    prompt: &str,
    aspect_ratio: &str,
    image_size: &str,
    refs: &[RefImage],
) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(2 + refs.len() * 2);
    parts.push(Part {
        text: Some(primer(aspect_ratio, image_size, refs.len())),
        ..Default::default()
    });
    for (i, r) in refs.iter().take(REF_LABELS.len()).enumerate() {
        let (num, cn, _) = REF_LABELS[i];
        parts.push(Part {
            text: Some(format!("Reference Image {num} ({cn}) below:")),
            ..Default::default()
        });
        parts.push(Part {
            inline_data: Some(InlineData {
                mime_type: r.mime_type.clone(),
                data: r.data_base64.clone(),
            }),
            ..Default::default()
        });
    }
    parts.push(Part {
        text: Some(prompt.to_string()),
        ..Default::default()
    });
    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts,
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            candidate_count: 1,
            image_config: Some(ImageConfig {
                aspect_ratio: aspect_ratio.to_string(),
                image_size: image_size.to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_no_refs() {
        let req = build_request("a red cube", "1:1", "4K", &[]);
        assert_eq!(1, req.contents.len());
        assert_eq!("user", req.contents[0].role);
        // primer + prompt
        assert_eq!(2, req.contents[0].parts.len());
        let primer = req.contents[0].parts[0].text.as_ref().unwrap();
        assert!(primer.contains("1:1"));
        assert!(primer.contains("4K"));
        assert!(primer.contains("image/png"));
        assert_eq!(
            "a red cube",
            req.contents[0].parts[1].text.as_deref().unwrap()
        );
        assert_eq!(1, req.generation_config.candidate_count);
        assert_eq!(vec!["TEXT", "IMAGE"], req.generation_config.response_modalities);
    }

    #[test]
    fn test_build_request_two_refs() {
        let refs = vec![
            RefImage {
                mime_type: "image/png".into(),
                data_base64: "AAAA".into(),
            },
            RefImage {
                mime_type: "image/jpeg".into(),
                data_base64: "BBBB".into(),
            },
        ];
        let req = build_request("p", "16:9", "1K", &refs);
        let parts = &req.contents[0].parts;
        // primer, label1, image1, label2, image2, prompt
        assert_eq!(6, parts.len());
        assert!(parts[1].text.as_ref().unwrap().contains("图一"));
        assert_eq!(
            "image/png",
            parts[2].inline_data.as_ref().unwrap().mime_type
        );
        assert!(parts[3].text.as_ref().unwrap().contains("图二"));
        assert_eq!("BBBB", parts[4].inline_data.as_ref().unwrap().data);
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let req = build_request("p", "1:1", "2K", &[]);
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("generationConfig").is_some());
        let gc = &v["generationConfig"];
        assert_eq!(1, gc["candidateCount"]);
        assert_eq!("1:1", gc["imageConfig"]["aspectRatio"]);
        // text-only parts must not carry a null inlineData
        assert!(v["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn test_response_parse_collects_inline_data() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "QUJD"}}
                ]}},
                {"content": {"parts": [
                    {"inlineData": {"mimeType": "image/webp", "data": "REVG"}}
                ]}}
            ]
        }"#;
        let res: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let images: Vec<_> = res
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.inline_data)
            .collect();
        assert_eq!(2, images.len());
        assert_eq!("QUJD", images[0].data);
        assert_eq!("image/webp", images[1].mime_type);
    }

    #[test]
    fn test_response_parse_empty() {
        let res: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(res.candidates.is_empty());
    }
}
