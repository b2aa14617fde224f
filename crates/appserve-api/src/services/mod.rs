pub mod app_serve;
pub mod locks;
pub mod params;

pub use app_serve::AppServeAppService;
