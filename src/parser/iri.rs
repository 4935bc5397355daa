// RFC 3986 reference resolution: scheme detection, authority handling,
// path merge, dot-segment removal, and query/fragment recomposition.

#[derive(Debug, Default)]
struct IriParts<'a> {
    scheme: Option<&'a str>,
    authority: Option<&'a str>,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

fn split_iri(iri: &str) -> IriParts<'_> {
    let mut parts = IriParts::default();
    let mut rest = iri;

    if let Some(pos) = rest.find('#') {
        parts.fragment = Some(&rest[pos + 1..]);
        rest = &rest[..pos];
    }
    if let Some(pos) = rest.find('?') {
        parts.query = Some(&rest[pos + 1..]);
        rest = &rest[..pos];
    }
    if let Some(pos) = rest.find(':') {
        let candidate = &rest[..pos];
        let valid = candidate
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid && !candidate.contains('/') {
            parts.scheme = Some(candidate);
            rest = &rest[pos + 1..];
        }
    }
    if let Some(after) = rest.strip_prefix("//") {
        let end = after
            .find(['/', '?', '#'])
            .unwrap_or(after.len());
        parts.authority = Some(&after[..end]);
        rest = &after[end..];
    }
    parts.path = rest;
    parts
}

// RFC 3986 §5.2.4
fn remove_dot_segments(path: &str) -> String {
    let mut input = path.to_string();
    let mut output = String::with_capacity(path.len());

    while !input.is_empty() {
        if input.starts_with("../") {
            input.drain(..3);
        } else if input.starts_with("./") {
            input.drain(..2);
        } else if input.starts_with("/./") {
            input.replace_range(..3, "/");
        } else if input == "/." {
            input.replace_range(.., "/");
        } else if input.starts_with("/../") {
            input.replace_range(..4, "/");
            pop_last_segment(&mut output);
        } else if input == "/.." {
            input.replace_range(.., "/");
            pop_last_segment(&mut output);
        } else if input == "." || input == ".." {
            input.clear();
        } else {
            let skip = usize::from(input.starts_with('/'));
            let end = input[skip..]
                .find('/')
                .map(|p| p + skip)
                .unwrap_or(input.len());
            output.push_str(&input[..end]);
            input.drain(..end);
        }
    }
    output
}

fn pop_last_segment(output: &mut String) {
    if let Some(pos) = output.rfind('/') {
        output.truncate(pos);
    } else {
        output.clear();
    }
}

fn merge_paths(base: &IriParts<'_>, reference_path: &str) -> String {
    if base.authority.is_some() && base.path.is_empty() {
        let mut merged = String::with_capacity(reference_path.len() + 1);
        merged.push('/');
        merged.push_str(reference_path);
        merged
    } else {
        match base.path.rfind('/') {
            Some(pos) => {
                let mut merged = String::with_capacity(pos + 1 + reference_path.len());
                merged.push_str(&base.path[..=pos]);
                merged.push_str(reference_path);
                merged
            }
            None => reference_path.to_string(),
        }
    }
}

/// Resolve `reference` against `base` per RFC 3986 §5.2.
pub fn resolve_iri(base: &str, reference: &str) -> String {
    let r = split_iri(reference);
    let b = split_iri(base);

    let (scheme, authority, path, query);
    if r.scheme.is_some() {
        scheme = r.scheme;
        authority = r.authority;
        path = remove_dot_segments(r.path);
        query = r.query;
    } else if r.authority.is_some() {
        scheme = b.scheme;
        authority = r.authority;
        path = remove_dot_segments(r.path);
        query = r.query;
    } else if r.path.is_empty() {
        scheme = b.scheme;
        authority = b.authority;
        path = b.path.to_string();
        query = r.query.or(b.query);
    } else if r.path.starts_with('/') {
        scheme = b.scheme;
        authority = b.authority;
        path = remove_dot_segments(r.path);
        query = r.query;
    } else {
        scheme = b.scheme;
        authority = b.authority;
        path = remove_dot_segments(&merge_paths(&b, r.path));
        query = r.query;
    }

    let mut out = String::with_capacity(base.len() + reference.len());
    if let Some(scheme) = scheme {
        out.push_str(scheme);
        out.push(':');
    }
    if let Some(authority) = authority {
        out.push_str("//");
        out.push_str(authority);
    }
    out.push_str(&path);
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = r.fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// True when the reference carries its own scheme.
pub fn is_absolute_iri(iri: &str) -> bool {
    split_iri(iri).scheme.is_some()
}
