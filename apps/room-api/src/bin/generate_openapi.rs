use utoipa::OpenApi;

fn main() {
    let spec = room_api::routes::ApiDoc::openapi().to_pretty_json().unwrap();
    println!("{spec}");
}
