use page_enhancer::{
    Behavior, EnhancementPlan, FilePayload, NotificationKind, Page, Result, Rule,
};

const PUBLIC_PAGE_HTML: &str = r##"
<body>
  <nav class="navbar">
    <div class="navbar-collapse show" id="mainNav">
      <a class="nav-link" id="homeLink" href="/">Home</a>
      <a class="nav-link" id="productsLink" href="/products">Products</a>
    </div>
  </nav>

  <div class="alert alert-success" id="flash">Order placed</div>

  <a id="offersAnchor" href="#offers">Today's offers</a>
  <section id="offers">Offers</section>

  <input id="searchInput" placeholder="Search products">
  <div class="searchable-item" id="item-mug">Coffee Mug</div>
  <div class="searchable-item" id="item-shirt">Cotton Shirt</div>
  <div class="searchable-item" id="item-soap">Herbal Soap</div>

  <div class="filter-group">
    <button type="button" class="filter-btn active" id="filterAll" data-filter="all">All</button>
    <button type="button" class="filter-btn" id="filterElectronics" data-filter="electronics">Electronics</button>
    <button type="button" class="filter-btn" id="filterGrocery" data-filter="grocery">Grocery</button>
  </div>
  <div class="product-card" id="cardRadio" data-category="electronics">Radio</div>
  <div class="product-card" id="cardRice" data-category="grocery">Rice</div>
  <div class="product-card" id="cardTorch" data-category="electronics">Torch</div>

  <input type="range" id="priceRange" value="250">
  <span id="priceDisplay"></span>

  <img id="heroImage" class="lazy" data-src="assets/hero.jpg" src="assets/placeholder.gif">

  <form id="checkoutForm" class="needs-validation" action="/checkout" method="post">
    <input name="address" id="address" required>
    <button type="submit" id="checkoutButton">Place Order</button>
  </form>

  <form id="loginForm" action="/auth/login" method="post">
    <input name="username" id="username" required>
    <button type="submit" id="loginButton">Log In</button>
  </form>

  <form id="contactForm" action="/contact" method="post">
    <input name="email" id="contactEmail">
    <textarea name="message" id="contactMessage"></textarea>
    <button type="submit" class="btn btn-primary" id="contactButton">Send Message</button>
  </form>
</body>
"##;

fn public_page() -> Result<Page> {
    let mut page = Page::from_html(PUBLIC_PAGE_HTML)?;
    page.bootstrap(&EnhancementPlan::standard())?;
    Ok(page)
}

#[test]
fn alerts_present_at_bootstrap_dismiss_at_exactly_five_seconds() -> Result<()> {
    let mut page = public_page()?;

    page.advance_time(4999)?;
    page.assert_exists("#flash")?;
    page.advance_time(1)?;
    page.assert_not_exists("#flash")?;
    Ok(())
}

#[test]
fn notification_helper_reuses_the_alert_lifetime() -> Result<()> {
    let mut page = public_page()?;

    page.show_notification("Cart updated", NotificationKind::Info)?;
    page.assert_exists(".alert.alert-info")?;
    page.advance_time(5000)?;
    page.assert_not_exists(".alert.alert-info")?;
    Ok(())
}

#[test]
fn live_search_visibility_matches_case_insensitive_containment() -> Result<()> {
    let mut page = public_page()?;

    page.type_text("#searchInput", "SHIRT")?;
    page.assert_hidden("#item-mug")?;
    page.assert_visible("#item-shirt")?;
    page.assert_hidden("#item-soap")?;

    page.type_text("#searchInput", "o")?;
    page.assert_visible("#item-mug")?;
    page.assert_visible("#item-shirt")?;
    page.assert_visible("#item-soap")?;

    page.type_text("#searchInput", "")?;
    page.assert_visible("#item-mug")?;
    page.assert_visible("#item-shirt")?;
    page.assert_visible("#item-soap")?;
    Ok(())
}

#[test]
fn category_filter_shows_exact_matches_and_keeps_one_button_active() -> Result<()> {
    let mut page = public_page()?;

    page.click("#filterElectronics")?;
    page.assert_visible("#cardRadio")?;
    page.assert_hidden("#cardRice")?;
    page.assert_visible("#cardTorch")?;
    assert_eq!(page.count(".filter-btn.active")?, 1);
    page.assert_has_class("#filterElectronics", "active", true)?;

    page.click("#filterGrocery")?;
    page.assert_hidden("#cardRadio")?;
    page.assert_visible("#cardRice")?;
    page.assert_hidden("#cardTorch")?;
    assert_eq!(page.count(".filter-btn.active")?, 1);

    page.click("#filterAll")?;
    page.assert_visible("#cardRadio")?;
    page.assert_visible("#cardRice")?;
    page.assert_visible("#cardTorch")?;
    assert_eq!(page.count(".filter-btn.active")?, 1);
    Ok(())
}

#[test]
fn back_to_top_visibility_tracks_the_scroll_threshold() -> Result<()> {
    let mut page = public_page()?;

    page.assert_exists("#backToTop")?;
    page.assert_hidden("#backToTop")?;

    page.scroll_to(301)?;
    page.assert_visible("#backToTop")?;

    page.scroll_to(300)?;
    page.assert_hidden("#backToTop")?;

    page.scroll_to(5000)?;
    page.assert_visible("#backToTop")?;

    page.click("#backToTop")?;
    assert_eq!(page.scroll_y(), 0);
    page.assert_hidden("#backToTop")?;
    Ok(())
}

#[test]
fn anchor_click_scrolls_to_the_target_layout_position() -> Result<()> {
    let mut page = Page::from_html(PUBLIC_PAGE_HTML)?;
    page.set_layout_top("#offers", 1400)?;
    page.bootstrap(&EnhancementPlan::standard())?;

    page.click("#offersAnchor")?;
    assert_eq!(page.scroll_y(), 1400);
    Ok(())
}

#[test]
fn lazy_image_loads_once_on_first_intersection() -> Result<()> {
    let mut page = Page::from_html(PUBLIC_PAGE_HTML)?;
    page.set_layout_top("#heroImage", 900)?;
    page.bootstrap(&EnhancementPlan::standard())?;

    // Below the fold at bootstrap: placeholder stays.
    assert_eq!(
        page.attr("#heroImage", "src")?.as_deref(),
        Some("assets/placeholder.gif")
    );

    page.scroll_to(400)?;
    assert_eq!(
        page.attr("#heroImage", "src")?.as_deref(),
        Some("assets/hero.jpg")
    );
    page.assert_has_class("#heroImage", "lazy", false)?;

    // Observation stopped; further scrolling does not re-arm the swap.
    page.scroll_to(0)?;
    page.scroll_to(500)?;
    assert_eq!(
        page.attr("#heroImage", "src")?.as_deref(),
        Some("assets/hero.jpg")
    );
    Ok(())
}

#[test]
fn explicit_intersection_trigger_loads_an_observed_image() -> Result<()> {
    let mut page = Page::from_html(PUBLIC_PAGE_HTML)?;
    page.set_layout_top("#heroImage", 9000)?;
    page.bootstrap(&EnhancementPlan::standard())?;

    page.intersect("#heroImage")?;
    assert_eq!(
        page.attr("#heroImage", "src")?.as_deref(),
        Some("assets/hero.jpg")
    );
    Ok(())
}

#[test]
fn image_preview_replaces_the_slot_with_exactly_one_thumbnail() -> Result<()> {
    let html = r#"
      <div class="upload">
        <input type="file" id="photoInput" accept="image/*">
        <div class="image-preview"></div>
      </div>
    "#;
    let mut page = Page::from_html(html)?;
    page.bootstrap(&EnhancementPlan::standard())?;

    page.select_file(
        "#photoInput",
        FilePayload::new("first.png", "image/png", b"first-bytes".to_vec()),
    )?;
    page.run_due_timers()?;
    assert_eq!(page.count(".image-preview img")?, 1);
    let src = page.attr(".image-preview img", "src")?.unwrap_or_default();
    assert!(src.starts_with("data:image/png;base64,"), "src={src}");

    page.select_file(
        "#photoInput",
        FilePayload::new("second.jpg", "image/jpeg", b"second-bytes".to_vec()),
    )?;
    page.run_due_timers()?;
    assert_eq!(page.count(".image-preview img")?, 1);
    let src = page.attr(".image-preview img", "src")?.unwrap_or_default();
    assert!(src.starts_with("data:image/jpeg;base64,"), "src={src}");
    Ok(())
}

#[test]
fn rapid_file_changes_cancel_the_inflight_read() -> Result<()> {
    let html = r#"
      <div class="upload">
        <input type="file" id="photoInput" accept="image/*">
        <div class="image-preview"></div>
      </div>
    "#;
    let mut page = Page::from_html(html)?;
    page.set_file_read_latency(50)?;
    page.bootstrap(&EnhancementPlan::standard())?;

    page.select_file(
        "#photoInput",
        FilePayload::new("stale.png", "image/png", b"stale".to_vec()),
    )?;
    page.select_file(
        "#photoInput",
        FilePayload::new("fresh.png", "image/png", b"fresh".to_vec()),
    )?;
    assert_eq!(page.pending_timers().len(), 1);

    page.advance_time(50)?;
    assert_eq!(page.count(".image-preview img")?, 1);
    let src = page.attr(".image-preview img", "src")?.unwrap_or_default();
    // base64("fresh") — the superseded read never lands.
    assert!(src.ends_with("ZnJlc2g="), "src={src}");
    Ok(())
}

#[test]
fn failed_file_read_leaves_the_preview_slot_untouched() -> Result<()> {
    let html = r#"
      <div class="upload">
        <input type="file" id="photoInput" accept="image/*">
        <div class="image-preview"><span id="hint">No image yet</span></div>
      </div>
    "#;
    let mut page = Page::from_html(html)?;
    page.set_file_reads_failing(true);
    page.bootstrap(&EnhancementPlan::standard())?;

    page.select_file(
        "#photoInput",
        FilePayload::new("broken.png", "image/png", b"oops".to_vec()),
    )?;
    page.run_due_timers()?;
    page.assert_exists("#hint")?;
    assert_eq!(page.count(".image-preview img")?, 0);
    Ok(())
}

#[test]
fn price_range_input_mirrors_into_the_display() -> Result<()> {
    let mut page = public_page()?;

    page.type_text("#priceRange", "750")?;
    page.assert_text("#priceDisplay", "\u{20b9}750")?;
    Ok(())
}

#[test]
fn nav_link_collapses_the_panel_only_below_the_breakpoint() -> Result<()> {
    let mut page = public_page()?;

    // Desktop width: panel stays expanded.
    page.click("#homeLink")?;
    page.assert_has_class("#mainNav", "show", true)?;

    page.set_viewport(375, 667)?;
    page.click("#productsLink")?;
    page.assert_has_class("#mainNav", "show", false)?;
    Ok(())
}

#[test]
fn login_form_submits_natively_without_validation_or_busy_state() -> Result<()> {
    let mut page = public_page()?;

    // Required field left empty on purpose: nothing may block the submit.
    page.click("#loginButton")?;

    assert_eq!(page.submissions().len(), 1);
    assert_eq!(page.submissions()[0].action, "/auth/login");
    page.assert_text("#loginButton", "Log In")?;
    page.assert_disabled("#loginButton", false)?;
    page.assert_has_class("#loginForm", "was-validated", false)?;
    Ok(())
}

#[test]
fn invalid_form_submit_is_cancelled_and_marked_was_validated() -> Result<()> {
    let mut page = public_page()?;

    page.click("#checkoutButton")?;
    assert!(page.submissions().is_empty());
    page.assert_has_class("#checkoutForm", "was-validated", true)?;
    // Busy state never engaged for an invalid form.
    page.assert_text("#checkoutButton", "Place Order")?;
    page.assert_disabled("#checkoutButton", false)?;

    // Every attempt re-evaluates: a filled form goes through.
    page.type_text("#address", "12 Bazaar Street")?;
    page.click("#checkoutButton")?;
    assert_eq!(page.submissions().len(), 1);
    Ok(())
}

#[test]
fn busy_control_is_restored_once_the_submission_settles() -> Result<()> {
    let mut page = public_page()?;

    page.type_text("#address", "12 Bazaar Street")?;
    page.click("#checkoutButton")?;

    assert_eq!(page.submissions().len(), 1);
    page.assert_text("#checkoutButton", "Place Order")?;
    page.assert_disabled("#checkoutButton", false)?;
    Ok(())
}

#[test]
fn contact_form_runs_the_simulated_send_and_never_submits() -> Result<()> {
    let mut page = public_page()?;

    page.type_text("#contactEmail", "dd@example.test")?;
    page.type_text("#contactMessage", "Do you deliver on Sundays?")?;
    page.click("#contactButton")?;

    page.assert_text("#contactButton", "Sending...")?;
    page.assert_disabled("#contactButton", true)?;

    page.advance_time(1499)?;
    page.assert_text("#contactButton", "Sending...")?;

    page.advance_time(1)?;
    page.assert_text("#contactButton", "Sent!")?;
    page.assert_has_class("#contactButton", "btn-success", true)?;
    page.assert_disabled("#contactButton", true)?;

    page.advance_time(2000)?;
    page.assert_text("#contactButton", "Send Message")?;
    page.assert_disabled("#contactButton", false)?;
    page.assert_has_class("#contactButton", "btn-success", false)?;
    page.assert_has_class("#contactButton", "btn-primary", true)?;
    page.assert_value("#contactEmail", "")?;
    page.assert_value("#contactMessage", "")?;

    assert!(page.submissions().is_empty());
    Ok(())
}

#[test]
fn plan_declared_in_json_drives_the_same_bootstrap() -> Result<()> {
    let json = r##"{
      "rules": [
        { "selector": ".alert", "behavior": "alert-auto-dismiss" },
        { "selector": "#searchInput", "behavior": "live-search" }
      ]
    }"##;
    let plan: EnhancementPlan = serde_json::from_str(json).expect("plan json");
    assert_eq!(
        plan.rules[0],
        Rule::new(".alert", Behavior::AlertAutoDismiss)
    );

    let mut page = Page::from_html(PUBLIC_PAGE_HTML)?;
    let report = page.bootstrap(&plan)?;
    assert_eq!(report.bindings.len(), 2);

    page.type_text("#searchInput", "rice")?;
    page.assert_hidden("#item-mug")?;
    page.advance_time(5000)?;
    page.assert_not_exists("#flash")?;
    Ok(())
}

#[test]
fn bootstrap_report_lists_bindings_and_exempted_forms() -> Result<()> {
    let mut page = Page::from_html(PUBLIC_PAGE_HTML)?;
    let report = page.bootstrap(&EnhancementPlan::standard())?;

    assert_eq!(report.exempted_forms, vec!["#loginForm".to_string()]);
    assert!(
        report
            .bindings
            .iter()
            .any(|binding| binding.behavior == Behavior::ContactForm
                && binding.target == "#contactForm")
    );
    // The public fixture has no tooltip, popover or copy triggers; those
    // rules simply report as unmatched.
    assert!(!report.warnings.is_empty());
    Ok(())
}
