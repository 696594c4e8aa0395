use axum::response::{IntoResponse, Response};
use http::{StatusCode, header::CONTENT_TYPE};
use quick_xml::{de::from_str as xml_from_str, se::to_string as xml_to_string};
use s3gate_common::{Bucket, ObjectRef, Part, Result, S3GateError};
use serde::{Deserialize, Serialize};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

#[derive(Debug, Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
pub struct ListAllMyBucketsResult {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Owner", skip_serializing_if = "Option::is_none")]
    owner: Option<Owner>,
    #[serde(rename = "Buckets")]
    buckets: Buckets,
}

#[derive(Debug, Serialize)]
struct Owner {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "DisplayName")]
    display_name: String,
}

#[derive(Debug, Serialize)]
struct Buckets {
    #[serde(rename = "Bucket", default)]
    bucket: Vec<BucketXml>,
}

#[derive(Debug, Serialize)]
struct BucketXml {
    #[serde(rename = "Name")]
    name: String,
}

impl ListAllMyBucketsResult {
    /// The owner block is omitted for anonymous callers.
    pub fn new(identity: Option<&str>, buckets: Vec<Bucket>) -> Self {
        Self {
            xmlns: S3_XMLNS,
            owner: identity.map(|id| Owner {
                id: id.to_string(),
                display_name: id.to_string(),
            }),
            buckets: Buckets {
                bucket: buckets
                    .into_iter()
                    .map(|bucket| BucketXml { name: bucket.name })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketResult {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Contents", default)]
    contents: Vec<ContentsXml>,
}

#[derive(Debug, Serialize)]
struct ContentsXml {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size")]
    size: u64,
}

impl ListBucketResult {
    pub fn new(bucket: &Bucket, objects: Vec<ObjectRef>) -> Self {
        Self {
            xmlns: S3_XMLNS,
            name: bucket.name.clone(),
            contents: objects
                .into_iter()
                .map(|object| ContentsXml {
                    key: object.key,
                    size: object.size,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUploadResult")]
pub struct CompleteMultipartUploadResult {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUploadXml {
    #[serde(rename = "Part", default)]
    parts: Vec<CompletePartXml>,
}

#[derive(Debug, Deserialize)]
struct CompletePartXml {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

/// Parses a completion request body into parts ordered by part number. A blank body
/// selects every uploaded part and yields an empty list.
pub fn parse_complete_parts(body: &str) -> Result<Vec<Part>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let request: CompleteMultipartUploadXml = xml_from_str(body).map_err(|err| {
        S3GateError::MalformedMultipartRequest(format!("invalid completion body: {err}"))
    })?;
    let mut parts: Vec<Part> = request
        .parts
        .into_iter()
        .map(|part| Part {
            part_number: part.part_number,
            etag: part.etag,
        })
        .collect();
    parts.sort_by_key(|part| part.part_number);
    Ok(parts)
}

pub fn xml_response<T: Serialize>(status: StatusCode, payload: &T) -> Result<Response> {
    let xml = xml_to_string(payload).map_err(|err| {
        S3GateError::InternalError(format!("failed to serialize xml response: {err}"))
    })?;
    let body = format!("{XML_DECLARATION}{xml}");
    Ok((status, [(CONTENT_TYPE, "application/xml")], body).into_response())
}

pub fn quoted_etag(etag: &str) -> String {
    if etag.starts_with('"') && etag.ends_with('"') {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}

#[cfg(test)]
mod tests {
    use quick_xml::se::to_string;
    use s3gate_common::{Bucket, ObjectRef};

    use super::{ListAllMyBucketsResult, ListBucketResult, parse_complete_parts, quoted_etag};

    #[test]
    fn bucket_listing_omits_owner_for_anonymous() {
        let xml = to_string(&ListAllMyBucketsResult::new(None, vec![Bucket::new("a")])).unwrap();
        assert!(xml.starts_with(
            "<ListAllMyBucketsResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">"
        ));
        assert!(!xml.contains("<Owner>"));
        assert!(xml.contains("<Buckets><Bucket><Name>a</Name></Bucket></Buckets>"));

        let xml = to_string(&ListAllMyBucketsResult::new(
            Some("alice"),
            vec![Bucket::new("a"), Bucket::new("b")],
        ))
        .unwrap();
        assert!(xml.contains("<Owner><ID>alice</ID><DisplayName>alice</DisplayName></Owner>"));
        assert!(xml.find("<Name>a</Name>").unwrap() < xml.find("<Name>b</Name>").unwrap());
    }

    #[test]
    fn object_listing_escapes_keys() {
        let bucket = Bucket::new("photos");
        let xml = to_string(&ListBucketResult::new(
            &bucket,
            vec![ObjectRef::new(bucket.clone(), "a&b<c>.jpg", 42)],
        ))
        .unwrap();
        assert!(xml.starts_with(
            "<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><Name>photos</Name>"
        ));
        assert!(xml.contains("<Key>a&amp;b&lt;c&gt;.jpg</Key><Size>42</Size>"));
    }

    #[test]
    fn completion_body_is_sorted() {
        let body = r#"<CompleteMultipartUpload xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Part><PartNumber>2</PartNumber><ETag>"bb"</ETag></Part>
  <Part><PartNumber>1</PartNumber><ETag>"aa"</ETag></Part>
</CompleteMultipartUpload>"#;
        let parts = parse_complete_parts(body).unwrap();
        assert_eq!(
            parts.iter().map(|part| part.part_number).collect::<Vec<_>>(),
            [1, 2]
        );
        assert_eq!(parts[0].etag, "\"aa\"");
    }

    #[test]
    fn blank_completion_body_selects_all_parts() {
        assert!(parse_complete_parts("").unwrap().is_empty());
        assert!(parse_complete_parts("  \n").unwrap().is_empty());
        assert!(parse_complete_parts("<CompleteMultipartUpload><Part>").is_err());
    }

    #[test]
    fn etags_are_quoted_once() {
        assert_eq!(quoted_etag("abc"), "\"abc\"");
        assert_eq!(quoted_etag("\"abc\""), "\"abc\"");
    }
}
