pub mod supabase;

pub use supabase::{eq_filter, in_filter, DatabaseError, SupabaseClient};
