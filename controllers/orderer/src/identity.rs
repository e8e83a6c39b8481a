//! MSP identity derived from the orderer's signing certificate.
//!
//! The organization named in the certificate becomes the node's MSP ID. The
//! subject is consulted first, then the issuer; anything unreadable falls back
//! to a fixed placeholder so that a bundle can still be produced.

use tracing::{debug, warn};
use x509_parser::der_parser::asn1_rs::Tag;
use x509_parser::prelude::{AttributeTypeAndValue, X509Name};

/// Identity label used when the certificate names no organization
pub const PLACEHOLDER_IDENTITY: &str = "SampleOrgMSPID";

/// Returns the first non-empty organization in the subject of the first PEM
/// block of `sign_cert`, else the first in its issuer, else
/// [`PLACEHOLDER_IDENTITY`].
pub fn extract_identity(sign_cert: &[u8]) -> String {
    let block = match pem::parse(sign_cert) {
        Ok(block) => block,
        Err(e) => {
            debug!("No PEM block in signing certificate: {}", e);
            return PLACEHOLDER_IDENTITY.to_string();
        }
    };

    match x509_parser::parse_x509_certificate(block.contents()) {
        Ok((_, cert)) => first_organization(cert.subject())
            .or_else(|| first_organization(cert.issuer()))
            .unwrap_or_else(|| PLACEHOLDER_IDENTITY.to_string()),
        Err(e) => {
            warn!("Failed to parse signing certificate: {}", e);
            PLACEHOLDER_IDENTITY.to_string()
        }
    }
}

fn first_organization(name: &X509Name<'_>) -> Option<String> {
    name.iter_organization()
        .filter_map(attribute_text)
        .find(|organization| !organization.is_empty())
}

/// Text of a directory string. TeletexString is taken byte for byte and
/// BMPString is UTF-16BE; other non-UTF-8 string types are unreadable.
fn attribute_text(attribute: &AttributeTypeAndValue<'_>) -> Option<String> {
    if let Ok(text) = attribute.as_str() {
        return Some(text.to_string());
    }
    let bytes = attribute.as_slice();
    match attribute.attr_value().tag() {
        Tag::T61String => Some(String::from_utf8_lossy(bytes).into_owned()),
        Tag::BmpString if bytes.len() % 2 == 0 => {
            let units = bytes.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units).collect::<Result<String, _>>().ok()
        }
        _ => None,
    }
}
