//! Response envelopes: data list, optional meta block and HATEOAS links, under the
//! keys configured in [`Settings`].

use crate::config::Settings;
use crate::io::Document;
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Link {
    pub href: String,
    pub title: String,
}

impl Link {
    pub fn new(href: impl Into<String>, title: impl Into<String>) -> Self {
        Link {
            href: href.into(),
            title: title.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Links {
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_: Option<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Link>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Meta {
    pub page: u64,
    pub max_results: u64,
    pub total: u64,
}

/// Where a listing lives and how it was paged; enough to build its links.
pub struct PageRequest<'a> {
    pub path: &'a str,
    pub title: &'a str,
    pub parent: Link,
    pub page: u64,
    pub max_results: u64,
}

/// `self`/`parent` always; `next`/`last` only when the total spans more than one page.
pub fn page_links(settings: &Settings, req: &PageRequest<'_>, total: u64) -> Links {
    let mut links = Links {
        self_: Some(Link::new(req.path, req.title)),
        parent: Some(req.parent.clone()),
        ..Links::default()
    };
    if req.max_results > 0 && total > req.max_results {
        let href = |page: u64| {
            let mut href = format!("{}?{}={}", req.path, settings.query_page, page);
            if req.max_results != settings.pagination_default {
                href.push_str(&format!("&{}={}", settings.query_max_results, req.max_results));
            }
            href
        };
        let last_page = total.div_ceil(req.max_results);
        links.next = Some(Link::new(href(req.page + 1), "next page"));
        links.last = Some(Link::new(href(last_page), "last page"));
    }
    links
}

/// Item links: the item itself and its collection.
pub fn item_links(collection_path: &str, collection_title: &str, item_href: &str, item_title: &str) -> Links {
    Links {
        self_: Some(Link::new(item_href, item_title)),
        parent: Some(Link::new(collection_path, collection_title)),
        ..Links::default()
    }
}

/// A response body under configurable keys.
pub struct Envelope {
    data: Vec<Document>,
    meta: Option<Meta>,
    links: Option<Links>,
}

impl Envelope {
    /// Paginated listing: data, meta and links (meta and links only when enabled).
    pub fn page(data: Vec<Document>, meta: Option<Meta>, links: Option<Links>) -> Self {
        Envelope { data, meta, links }
    }

    /// Creation result: data only.
    pub fn created(data: Vec<Document>) -> Self {
        Envelope {
            data,
            meta: None,
            links: None,
        }
    }

    /// Single item: a list of one plus item links.
    pub fn item(doc: Document, links: Option<Links>) -> Self {
        Envelope {
            data: vec![doc],
            meta: None,
            links,
        }
    }

    pub fn into_json(self, settings: &Settings) -> Value {
        let mut out = Map::new();
        out.insert(
            settings.data_key.clone(),
            Value::Array(self.data.into_iter().map(Value::Object).collect()),
        );
        if let Some(meta) = self.meta {
            out.insert(settings.meta_key.clone(), serde_json::to_value(meta).unwrap_or(Value::Null));
        }
        if let Some(links) = self.links {
            out.insert(settings.links_key.clone(), serde_json::to_value(links).unwrap_or(Value::Null));
        }
        Value::Object(out)
    }

    pub fn respond(self, settings: &Settings, status: StatusCode) -> Response {
        (status, Json(self.into_json(settings))).into_response()
    }
}
