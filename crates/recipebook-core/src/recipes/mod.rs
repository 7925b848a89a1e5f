//! Recipe list and recipe editing.
//!
//! Recipes are kept in memory only; `RecipeForm` edits one recipe at a time
//! and writes it back through `RecipeForm::submit`.

pub mod book;
pub mod form;

pub use book::RecipeBook;
pub use form::{Field, FieldError, FormError, FormMode, IngredientRow, RecipeForm};
