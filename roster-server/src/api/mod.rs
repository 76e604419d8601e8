//! HTTP API handlers

pub mod auth;
pub mod extra_emails;
pub mod health;
pub mod rows;
pub mod sheets;
pub mod view;

pub use auth::{auth_middleware, auth_routes};
pub use extra_emails::{get_extra_emails, put_extra_emails};
pub use health::health_routes;
pub use rows::{delete_row, update_row};
pub use sheets::{
    add_rows, add_sheet, delete_sheet, export_csv, find_row, get_sheet, import_csv, list_sheets,
    update_sheet,
};
pub use view::{combined_view, export_view, view_emails};
