//! View data and the renderers that turn it into responses.
//!
//! Handlers only ever build a [`View`]; how it is presented is the renderer's business.

use std::fmt::Write as _;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;
use crate::gateway::{Listing, RecordView};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    Login { error: Option<String> },
    Index { login: String, role: String, entities: Vec<String> },
    Table(Listing),
    CreateForm { entity: String, columns: Vec<String> },
    EditForm(RecordView),
}

pub trait Renderer: Send + Sync {
    fn render(&self, status: StatusCode, view: &View) -> Response;

    /// Never called with `Unauthenticated`; the server redirects those before rendering.
    fn error(&self, err: &AppError) -> Response;
}

fn status_of(err: &AppError) -> StatusCode {
    StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serializes views as tagged JSON documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, status: StatusCode, view: &View) -> Response {
        (status, Json(view)).into_response()
    }

    fn error(&self, err: &AppError) -> Response {
        (status_of(err), Json(err)).into_response()
    }
}

/// Minimal server-side HTML pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRenderer;

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn cell_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}\n</body></html>\n",
        escape_html(title),
        body
    )
}

fn fields(out: &mut String, columns: &[String], record: Option<&serde_json::Map<String, Value>>) {
    for col in columns {
        let c = escape_html(col);
        let v = escape_html(&cell_text(record.and_then(|r| r.get(col))));
        let _ = writeln!(out, "<p><label>{c} <input name=\"{c}\" value=\"{v}\"></label></p>");
    }
}

impl HtmlRenderer {
    fn body(view: &View) -> (String, String) {
        let mut b = String::new();
        match view {
            View::Login { error } => {
                b.push_str("<h1>Sign in</h1>\n");
                if let Some(e) = error {
                    let _ = writeln!(b, "<p class=\"error\">{}</p>", escape_html(e));
                }
                b.push_str(
                    "<form method=\"post\" action=\"/auth/login\">\n\
                     <p><label>Login <input name=\"login\"></label></p>\n\
                     <p><label>Password <input name=\"password\" type=\"password\"></label></p>\n\
                     <button type=\"submit\">Sign in</button>\n</form>",
                );
                ("Sign in".into(), b)
            }
            View::Index { login, role, entities } => {
                let _ = writeln!(b, "<p>{} ({}) <a href=\"/auth/logout\">Sign out</a></p>", escape_html(login), escape_html(role));
                b.push_str("<ul>\n");
                for e in entities {
                    let e = escape_html(e);
                    let _ = writeln!(b, "<li><a href=\"/view/{e}\">{e}</a></li>");
                }
                b.push_str("</ul>");
                ("Tables".into(), b)
            }
            View::Table(listing) => {
                let entity = escape_html(&listing.entity);
                let _ = writeln!(b, "<h1>{entity}</h1>\n<p><a href=\"/{entity}/create\">New record</a> <a href=\"/\">Back</a></p>");
                b.push_str("<table>\n<tr>");
                for c in &listing.columns {
                    let _ = write!(b, "<th>{}</th>", escape_html(c));
                }
                b.push_str("<th></th></tr>\n");
                for row in &listing.rows {
                    b.push_str("<tr>");
                    for c in &listing.columns {
                        let _ = write!(b, "<td>{}</td>", escape_html(&cell_text(row.get(c))));
                    }
                    let id = escape_html(&cell_text(row.get(&listing.primary_key)));
                    let _ = writeln!(
                        b,
                        "<td><a href=\"/{entity}/edit/{id}\">Edit</a> \
                         <form method=\"post\" action=\"/{entity}/delete/{id}\"><button type=\"submit\">Delete</button></form></td></tr>"
                    );
                }
                b.push_str("</table>");
                (listing.entity.clone(), b)
            }
            View::CreateForm { entity, columns } => {
                let e = escape_html(entity);
                let _ = writeln!(b, "<h1>New {e}</h1>\n<form method=\"post\" action=\"/{e}/create\">");
                fields(&mut b, columns, None);
                b.push_str("<button type=\"submit\">Create</button>\n</form>");
                (format!("New {entity}"), b)
            }
            View::EditForm(rv) => {
                let e = escape_html(&rv.entity);
                let _ = writeln!(b, "<h1>{e} #{}</h1>\n<form method=\"post\" action=\"/{e}/edit/{}\">", rv.record_id, rv.record_id);
                let editable: Vec<String> = rv.columns.iter().filter(|c| **c != rv.primary_key).cloned().collect();
                fields(&mut b, &editable, Some(&rv.record));
                b.push_str("<button type=\"submit\">Save</button>\n</form>");
                (format!("{} #{}", rv.entity, rv.record_id), b)
            }
        }
    }
}

impl Renderer for HtmlRenderer {
    fn render(&self, status: StatusCode, view: &View) -> Response {
        let (title, body) = Self::body(view);
        (status, Html(page(&title, &body))).into_response()
    }

    fn error(&self, err: &AppError) -> Response {
        let status = status_of(err);
        let body = format!("<h1>{}</h1>\n<p>{}</p>\n<p><a href=\"/\">Back</a></p>", status.as_u16(), escape_html(err.message()));
        (status, Html(page(status.canonical_reason().unwrap_or("Error"), &body))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b a=\"1\">&'"), "&lt;b a=&quot;1&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn table_view_escapes_cell_values() {
        let mut row = serde_json::Map::new();
        row.insert("repair_id".into(), Value::from(7));
        row.insert("notes".into(), Value::from("<script>x</script>"));
        let view = View::Table(Listing {
            entity: "repair".into(),
            primary_key: "repair_id".into(),
            columns: vec!["repair_id".into(), "notes".into()],
            rows: vec![row],
        });
        let (_, body) = HtmlRenderer::body(&view);
        assert!(body.contains("&lt;script&gt;"));
        assert!(!body.contains("<script>"));
        assert!(body.contains("/repair/edit/7"));
    }

    #[test]
    fn json_views_are_tagged() {
        let v = serde_json::to_value(View::Login { error: None }).unwrap();
        assert_eq!(v["view"], "login");
        let v = serde_json::to_value(View::CreateForm { entity: "client".into(), columns: vec!["name".into()] }).unwrap();
        assert_eq!(v["view"], "create_form");
        assert_eq!(v["columns"][0], "name");
    }
}
