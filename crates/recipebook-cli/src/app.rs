//! Interactive shell state and command handling.

use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use recipebook_core::api::IdentityClient;
use recipebook_core::auth::{
    AuthEvent, AuthHandle, AuthOrchestrator, ExpiryTimer, SessionRecord, SessionStore,
};
use recipebook_core::config::Config;
use recipebook_core::recipes::{RecipeBook, RecipeForm};
use recipebook_core::routes::{NavTarget, Route, RouteError, Router, WatchNavigator};
use recipebook_core::storage::FileBlobStore;
use recipebook_core::utils::{format_remaining, truncate_string};

/// Width of the description column in recipe listings
const LIST_DESCRIPTION_WIDTH: usize = 40;

const HELP: &str = "\
Commands:
  login [email]     Sign in
  signup [email]    Create an account
  logout            Sign out
  status            Show the session
  list              List recipes
  show <id>         Show a recipe
  new               Create a recipe
  edit <id>         Edit a recipe
  delete <id>       Delete a recipe
  go <path>         Open a path, e.g. /recipes/0/edit
  help              Show this help
  quit              Exit";

const FORM_HELP: &str = "\
  a        add ingredient
  d <n>    delete ingredient n
  c        clear ingredients
  s        save
  q        cancel";

enum Flow {
    Continue,
    Quit,
}

pub struct App {
    config: Config,
    auth: AuthHandle,
    events: broadcast::Receiver<AuthEvent>,
    navigation: watch::Receiver<Option<NavTarget>>,
    router: Router,
    book: RecipeBook,
    route: Route,
    input: Lines<BufReader<Stdin>>,
}

impl App {
    /// Wire the auth flow together and start the orchestrator task
    pub fn new(config: Config) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let client = IdentityClient::with_endpoint(config.endpoint(), api_key);
        debug!(endpoint = client.endpoint(), "Identity client configured");

        let data_dir = config.data_dir()?;
        let blobs = FileBlobStore::new(data_dir).context("Failed to open session storage")?;
        let store = SessionStore::new(blobs);

        let (navigator, navigation) = WatchNavigator::new();
        let (orchestrator, auth) =
            AuthOrchestrator::new(client, store, ExpiryTimer::new(), navigator);
        tokio::spawn(orchestrator.run());

        let events = auth.subscribe();
        let router = Router::new(auth.guard());

        Ok(Self {
            config,
            auth,
            events,
            navigation,
            router,
            book: RecipeBook::new(),
            route: Route::Auth,
            input: BufReader::new(tokio::io::stdin()).lines(),
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        self.auth.auto_login()?;
        self.wait_for(|e| matches!(e, AuthEvent::Authenticated(_) | AuthEvent::Unchanged))
            .await?;
        self.apply_navigation();

        println!("Type 'help' for commands.");
        loop {
            self.drain_events();
            self.apply_navigation();
            self.print_header();

            let Some(line) = self.prompt(&format!("{}> ", self.route)).await? else {
                break;
            };

            match self.execute(line.trim()).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(e) => println!("Error: {}", e),
            }
        }

        Ok(())
    }

    async fn execute(&mut self, line: &str) -> Result<Flow> {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Ok(Flow::Continue);
        };
        let arg = parts.next();

        match command {
            "help" | "?" => println!("{}", HELP),
            "quit" | "exit" => return Ok(Flow::Quit),
            "status" => self.print_status(),
            "login" => self.authenticate(arg, false).await?,
            "signup" => self.authenticate(arg, true).await?,
            "logout" => {
                self.auth.logout()?;
                self.wait_for(|e| matches!(e, AuthEvent::LoggedOut)).await?;
            }
            "list" => self.open("/recipes").await?,
            "new" => self.open("/recipes/new").await?,
            "show" => self.open(&format!("/recipes/{}", Self::id_arg(arg)?)).await?,
            "edit" => self.open(&format!("/recipes/{}/edit", Self::id_arg(arg)?)).await?,
            "delete" => {
                let id = Self::id_arg(arg)?;
                // Deleting needs the same access as viewing
                if self.enter(&format!("/recipes/{}", id)).is_some() {
                    match self.book.delete(id) {
                        Some(recipe) => println!("Deleted '{}'", recipe.name),
                        None => println!("No recipe {}", id),
                    }
                    self.route = Route::Recipes;
                }
            }
            "go" => self.open(arg.unwrap_or("/")).await?,
            other => println!("Unknown command '{}'. Type 'help' for commands.", other),
        }

        Ok(Flow::Continue)
    }

    fn id_arg(arg: Option<&str>) -> Result<usize> {
        arg.ok_or_else(|| anyhow::anyhow!("Missing recipe id"))?
            .parse()
            .context("Recipe id must be a number")
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    async fn authenticate(&mut self, email: Option<&str>, signup: bool) -> Result<()> {
        let email = match email {
            Some(email) => email.to_string(),
            None => {
                let last = self.config.last_email.clone();
                let label = match last {
                    Some(ref last) => format!("Email [{}]: ", last),
                    None => "Email: ".to_string(),
                };
                let input = self.prompt(&label).await?.unwrap_or_default();
                let input = input.trim();
                match (input.is_empty(), last) {
                    (false, _) => input.to_string(),
                    (true, Some(last)) => last,
                    (true, None) => return Err(anyhow::anyhow!("Email required")),
                }
            }
        };

        let password = tokio::task::spawn_blocking(|| rpassword::prompt_password("Password: "))
            .await
            .context("Password prompt failed")??;
        if password.is_empty() {
            return Err(anyhow::anyhow!("Password required"));
        }

        // Drop outcomes that belong to earlier commands
        self.drain_events();

        if signup {
            self.auth.signup(email.clone(), password)?;
        } else {
            self.auth.login(email.clone(), password)?;
        }
        println!("Authenticating...");

        let outcome = self
            .wait_for(|e| matches!(e, AuthEvent::Authenticated(_) | AuthEvent::Failed(_)))
            .await?;

        if matches!(outcome, AuthEvent::Authenticated(_)) {
            self.config.last_email = Some(email);
            if let Err(e) = self.config.save() {
                warn!(error = %e, "Failed to save config");
            }
        }
        Ok(())
    }

    /// Print auth outcomes until one matches `done`, and return it
    async fn wait_for(&mut self, done: fn(&AuthEvent) -> bool) -> Result<AuthEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    Self::report(&event);
                    if done(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Auth events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow::anyhow!("Auth orchestrator stopped"));
                }
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            Self::report(&event);
        }
    }

    fn report(event: &AuthEvent) {
        match event {
            AuthEvent::Authenticated(record) => println!("Signed in as {}", record.email),
            AuthEvent::Failed(message) => println!("Authentication failed: {}", message),
            AuthEvent::LoggedOut => println!("Signed out"),
            AuthEvent::PersistFailed(message) => println!("Warning: {}", message),
            AuthEvent::Unchanged => {}
        }
    }

    fn print_header(&self) {
        match &*self.auth.session().borrow() {
            Some(record) => println!("[{}]", Self::session_line(record)),
            None => println!("[signed out]"),
        }
    }

    fn print_status(&self) {
        match &*self.auth.session().borrow() {
            Some(record) => {
                println!("Email:   {}", record.email);
                println!("User id: {}", record.user_id);
                println!("Expires: {}", record.token_expires_at.to_rfc3339());
                println!("Status:  {}", Self::session_line(record));
            }
            None => println!("Not signed in"),
        }
    }

    fn session_line(record: &SessionRecord) -> String {
        format!(
            "{} - token {}",
            record.email,
            format_remaining(record.time_until_expiry(Utc::now()))
        )
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Follow navigation requested by the auth flow
    fn apply_navigation(&mut self) {
        if self.navigation.has_changed().unwrap_or(false) {
            if let Some(target) = *self.navigation.borrow_and_update() {
                self.route = Route::from(target);
                debug!(route = %self.route, "Navigated");
            }
        }
    }

    /// Resolve a path through the router, following a guard redirect
    fn enter(&mut self, path: &str) -> Option<Route> {
        match self.router.resolve(path) {
            Ok(route) => Some(route),
            Err(RouteError::Redirect(route)) => {
                println!("Sign in required.");
                self.route = route;
                None
            }
            Err(e) => {
                println!("{}", e);
                None
            }
        }
    }

    async fn open(&mut self, path: &str) -> Result<()> {
        let Some(route) = self.enter(path) else {
            return Ok(());
        };

        match route {
            Route::Auth => {
                self.route = route;
                println!("Use 'login' or 'signup'.");
            }
            Route::Recipes => {
                self.route = route;
                self.print_recipes();
            }
            Route::RecipeDetail(id) => {
                if self.book.get(id).is_none() {
                    println!("No recipe {}", id);
                    return Ok(());
                }
                self.route = route;
                self.print_recipe(id);
            }
            Route::NewRecipe => {
                self.route = route;
                let saved = self.edit_form(RecipeForm::new()).await?;
                self.route = saved.map(Route::RecipeDetail).unwrap_or(Route::Recipes);
            }
            Route::EditRecipe(id) => {
                let Some(recipe) = self.book.get(id) else {
                    println!("No recipe {}", id);
                    return Ok(());
                };
                let form = RecipeForm::edit(id, recipe);
                self.route = route;
                self.edit_form(form).await?;
                self.route = Route::RecipeDetail(id);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Recipes
    // =========================================================================

    fn print_recipes(&self) {
        if self.book.is_empty() {
            println!("No recipes yet. Use 'new' to add one.");
            return;
        }
        for (id, recipe) in self.book.recipes().iter().enumerate() {
            println!(
                "{:>3}  {:<24} {}",
                id,
                truncate_string(&recipe.name, 24),
                truncate_string(&recipe.description, LIST_DESCRIPTION_WIDTH)
            );
        }
    }

    fn print_recipe(&self, id: usize) {
        let Some(recipe) = self.book.get(id) else {
            return;
        };
        println!("{}", recipe.name);
        println!("  {}", recipe.description);
        println!("  Image: {}", recipe.image_path);
        if !recipe.ingredients.is_empty() {
            println!("  Ingredients: {}", recipe.ingredient_summary());
        }
    }

    /// Edit a form interactively; returns the saved recipe id, or None if cancelled
    async fn edit_form(&mut self, mut form: RecipeForm) -> Result<Option<usize>> {
        form.name = self.prompt_field("Name", &form.name).await?;
        form.image_path = self.prompt_field("Image path", &form.image_path).await?;
        form.description = self.prompt_field("Description", &form.description).await?;

        println!("{}", FORM_HELP);
        loop {
            for (i, row) in form.ingredients().iter().enumerate() {
                println!("  {}. {} x{}", i + 1, row.name, row.amount);
            }

            let Some(line) = self.prompt("ingredients> ").await? else {
                return Ok(None);
            };
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("a"), _) => {
                    let name = self.prompt_field("  Ingredient", "").await?;
                    let amount = self.prompt_field("  Amount", "").await?;
                    let index = form.add_ingredient();
                    if let Some(row) = form.ingredient_mut(index) {
                        row.name = name;
                        row.amount = amount;
                    }
                }
                (Some("d"), Some(n)) => {
                    let removed = n
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .map(|i| form.delete_ingredient(i))
                        .unwrap_or(false);
                    if !removed {
                        println!("No ingredient {}", n);
                    }
                }
                (Some("c"), _) => form.clear_ingredients(),
                (Some("s"), _) => match form.submit(&mut self.book) {
                    Ok(id) => {
                        println!("Saved recipe {}", id);
                        return Ok(Some(id));
                    }
                    Err(e) => {
                        println!("{}", e);
                        if let Err(errors) = form.validate() {
                            for error in errors {
                                println!("  {}", error);
                            }
                        }
                    }
                },
                (Some("q"), _) => return Ok(None),
                _ => println!("{}", FORM_HELP),
            }
        }
    }

    // =========================================================================
    // Input
    // =========================================================================

    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        print!("{}", label);
        io::stdout().flush()?;
        Ok(self.input.next_line().await?)
    }

    /// Prompt for a value, keeping `current` when the input is empty
    async fn prompt_field(&mut self, label: &str, current: &str) -> Result<String> {
        let label = if current.is_empty() {
            format!("{}: ", label)
        } else {
            format!("{} [{}]: ", label, current)
        };
        let input = self.prompt(&label).await?.unwrap_or_default();
        let input = input.trim();
        Ok(if input.is_empty() {
            current.to_string()
        } else {
            input.to_string()
        })
    }
}
