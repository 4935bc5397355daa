// Content-type recognition and Accept-header negotiation.

/// The RDF serializations the engine knows about. Only the Turtle family
/// has parsers here; RDF/XML and JSON-LD are recognized for negotiation
/// but handled by external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    Turtle,
    NTriples,
    NQuads,
    TriG,
    RdfXml,
    JsonLd,
    Unknown,
}

impl RdfFormat {
    /// Map a content-type string (parameters ignored) to a format.
    pub fn from_content_type(content_type: &str) -> RdfFormat {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/turtle" => RdfFormat::Turtle,
            "application/n-triples" | "text/plain" => RdfFormat::NTriples,
            "application/n-quads" => RdfFormat::NQuads,
            "application/trig" => RdfFormat::TriG,
            "application/rdf+xml" | "application/xml" => RdfFormat::RdfXml,
            "application/ld+json" => RdfFormat::JsonLd,
            _ => RdfFormat::Unknown,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            RdfFormat::Turtle => "text/turtle",
            RdfFormat::NTriples => "application/n-triples",
            RdfFormat::NQuads => "application/n-quads",
            RdfFormat::TriG => "application/trig",
            RdfFormat::RdfXml => "application/rdf+xml",
            RdfFormat::JsonLd => "application/ld+json",
            RdfFormat::Unknown => "application/octet-stream",
        }
    }

    /// Whether this crate can parse the format.
    pub fn parseable(self) -> bool {
        matches!(
            self,
            RdfFormat::Turtle | RdfFormat::NTriples | RdfFormat::NQuads | RdfFormat::TriG
        )
    }
}

/// Pick the q-value-weighted preferred format from an Accept header.
/// Ties go to the earlier entry; `*/*` counts as Turtle.
pub fn negotiate_accept(accept: &str) -> RdfFormat {
    let mut best = RdfFormat::Unknown;
    let mut best_q = 0.0f32;

    for entry in accept.split(',') {
        let mut parts = entry.split(';');
        let media = parts.next().unwrap_or("").trim();
        let mut q = 1.0f32;
        for param in parts {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("q=") {
                q = value.parse().unwrap_or(0.0);
            }
        }

        let format = if media == "*/*" {
            RdfFormat::Turtle
        } else {
            RdfFormat::from_content_type(media)
        };
        if format != RdfFormat::Unknown && q > best_q {
            best = format;
            best_q = q;
        }
    }
    best
}
