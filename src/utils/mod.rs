pub mod access_cache;
pub mod dni;
pub mod dni_filter;
