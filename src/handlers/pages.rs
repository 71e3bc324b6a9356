use axum::response::Html;

/// Upload form; everything else goes through `/upload`.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../templates/index.html"))
}
