//! Editable recipe form with a variable-length ingredient list.
//!
//! Fields hold raw text as typed; `validate` checks the same rules for every
//! field and produces a `Recipe` only when all of them pass.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::models::{Ingredient, Recipe};

use super::RecipeBook;

/// Form field addressed by a validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    ImagePath,
    Description,
    IngredientName(usize),
    IngredientAmount(usize),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name => write!(f, "Name"),
            Field::ImagePath => write!(f, "Image path"),
            Field::Description => write!(f, "Description"),
            Field::IngredientName(i) => write!(f, "Ingredient {} name", i + 1),
            Field::IngredientAmount(i) => write!(f, "Ingredient {} amount", i + 1),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("{0} is required")]
    Required(Field),

    #[error("{0} must be a positive whole number")]
    InvalidAmount(Field),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("Recipe has {} invalid field(s)", .0.len())]
    Invalid(Vec<FieldError>),

    #[error("Recipe {0} does not exist")]
    RecipeNotFound(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngredientRow {
    pub name: String,
    pub amount: String,
}

#[derive(Debug, Clone)]
pub struct RecipeForm {
    mode: FormMode,
    pub name: String,
    pub image_path: String,
    pub description: String,
    ingredients: Vec<IngredientRow>,
}

impl RecipeForm {
    /// Empty form for a new recipe
    pub fn new() -> Self {
        Self {
            mode: FormMode::Create,
            name: String::new(),
            image_path: String::new(),
            description: String::new(),
            ingredients: Vec::new(),
        }
    }

    /// Form prefilled from the recipe stored under `id`
    pub fn edit(id: usize, recipe: &Recipe) -> Self {
        Self {
            mode: FormMode::Edit(id),
            name: recipe.name.clone(),
            image_path: recipe.image_path.clone(),
            description: recipe.description.clone(),
            ingredients: recipe
                .ingredients
                .iter()
                .map(|i| IngredientRow {
                    name: i.name.clone(),
                    amount: i.amount.to_string(),
                })
                .collect(),
        }
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn ingredients(&self) -> &[IngredientRow] {
        &self.ingredients
    }

    pub fn ingredient_mut(&mut self, index: usize) -> Option<&mut IngredientRow> {
        self.ingredients.get_mut(index)
    }

    /// Append a blank ingredient row and return its index
    pub fn add_ingredient(&mut self) -> usize {
        self.ingredients.push(IngredientRow::default());
        self.ingredients.len() - 1
    }

    pub fn delete_ingredient(&mut self, index: usize) -> bool {
        if index < self.ingredients.len() {
            self.ingredients.remove(index);
            true
        } else {
            false
        }
    }

    pub fn clear_ingredients(&mut self) {
        self.ingredients.clear();
    }

    pub fn validate(&self) -> Result<Recipe, Vec<FieldError>> {
        let mut errors = Vec::new();

        for (value, field) in [
            (&self.name, Field::Name),
            (&self.image_path, Field::ImagePath),
            (&self.description, Field::Description),
        ] {
            if value.is_empty() {
                errors.push(FieldError::Required(field));
            }
        }

        let mut ingredients = Vec::with_capacity(self.ingredients.len());
        for (index, row) in self.ingredients.iter().enumerate() {
            if row.name.is_empty() {
                errors.push(FieldError::Required(Field::IngredientName(index)));
            }

            let amount = if row.amount.is_empty() {
                errors.push(FieldError::Required(Field::IngredientAmount(index)));
                None
            } else {
                let parsed = parse_amount(&row.amount);
                if parsed.is_none() {
                    errors.push(FieldError::InvalidAmount(Field::IngredientAmount(index)));
                }
                parsed
            };

            if let Some(amount) = amount {
                ingredients.push(Ingredient::new(row.name.clone(), amount));
            }
        }

        if errors.is_empty() {
            Ok(Recipe::new(
                self.name.clone(),
                self.description.clone(),
                self.image_path.clone(),
                ingredients,
            ))
        } else {
            Err(errors)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Store the form's recipe: replace it in edit mode, append it otherwise.
    pub fn submit(&self, book: &mut RecipeBook) -> Result<usize, FormError> {
        let recipe = self.validate().map_err(FormError::Invalid)?;
        match self.mode {
            FormMode::Create => Ok(book.add(recipe)),
            FormMode::Edit(id) => {
                if book.update(id, recipe) {
                    Ok(id)
                } else {
                    debug!(id, "Edited recipe no longer exists");
                    Err(FormError::RecipeNotFound(id))
                }
            }
        }
    }
}

impl Default for RecipeForm {
    fn default() -> Self {
        Self::new()
    }
}

/// Amounts are positive whole numbers without leading zeros.
fn parse_amount(text: &str) -> Option<u32> {
    let mut chars = text.chars();
    let first = chars.next()?;
    if !('1'..='9').contains(&first) || !chars.all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
