use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::error::Error;
use crate::handlers::{html_response, json_response, retrieve, ui, upload, AppState};
use crate::{BoxError, Response};

type PathRouter = matchit::Router<Route>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Index,
    Health,
    Upload { burn: bool },
    View,
    Raw,
    Meta,
}

/// Fixed route table, one matcher per method. Anything unmatched gets the
/// uniform NotFound rendering.
pub struct Router {
    state: AppState,
    get: PathRouter,
    post: PathRouter,
}

impl Router {
    pub fn new(state: AppState) -> Router {
        let mut get = PathRouter::new();
        let mut post = PathRouter::new();

        get.insert("/", Route::Index).unwrap();
        get.insert("/health", Route::Health).unwrap();
        get.insert("/{slug}", Route::View).unwrap();
        get.insert("/raw/{slug}", Route::Raw).unwrap();
        get.insert("/api/v1/meta/{slug}", Route::Meta).unwrap();
        get.insert("/json/{slug}", Route::Meta).unwrap();

        post.insert("/", Route::Upload { burn: false }).unwrap();
        post.insert("/burn", Route::Upload { burn: true }).unwrap();
        post.insert("/burn/", Route::Upload { burn: true }).unwrap();

        Router { state, get, post }
    }

    pub async fn dispatch<B>(&self, req: http::Request<B>) -> Response
    where
        B: http_body::Body<Data = Bytes> + Send + Unpin,
        B::Error: Into<BoxError>,
    {
        let path = req.uri().path().to_owned();
        log::debug!("{} {path}", req.method());

        let table = match *req.method() {
            Method::GET | Method::HEAD => &self.get,
            Method::POST => &self.post,
            _ => return not_found(req.headers()),
        };

        let (route, slug) = match table.at(&path) {
            Ok(matched) => {
                (*matched.value, matched.params.get("slug").map(str::to_owned))
            }
            Err(_) => return not_found(req.headers()),
        };

        match route {
            Route::Index => html_response(StatusCode::OK, ui::index_page()),
            Route::Health => json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" })),
            Route::Upload { burn } => match upload::upload(&self.state, req, burn).await {
                Ok(resp) => resp,
                Err(err) => err.into_response(),
            },
            Route::View | Route::Raw | Route::Meta => {
                let (parts, _body) = req.into_parts();
                let slug = slug.unwrap_or_default();

                match route {
                    Route::View => retrieve::view(&self.state, &parts, &slug).await,
                    Route::Raw => retrieve::raw(&self.state, &parts, &slug).await,
                    _ => retrieve::meta(&self.state, &parts, &slug).await,
                }
            }
        }
    }
}

fn not_found(headers: &HeaderMap) -> Response {
    retrieve::error_response(Error::NotFound, headers)
}
