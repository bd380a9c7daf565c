use page_enhancer::{Behavior, EnhancementPlan, Page, Rule};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseResult};

const FILTER_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/filter_property_fuzz_test.txt";
const DEFAULT_FILTER_PROPTEST_CASES: u32 = 128;

fn filter_proptest_cases() -> u32 {
    std::env::var("PAGE_ENHANCER_PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_FILTER_PROPTEST_CASES)
}

const CATEGORIES: [&str; 4] = ["electronics", "grocery", "clothing", "stationery"];

fn item_text_strategy() -> BoxedStrategy<String> {
    let word = prop_oneof![
        Just("Coffee"),
        Just("Mug"),
        Just("COTTON"),
        Just("shirt"),
        Just("Herbal"),
        Just("Soap"),
        Just("Radio"),
        Just("rice"),
        Just("Torch"),
        Just("Pen"),
    ];
    vec(word, 1..=3)
        .prop_map(|words| words.join(" "))
        .boxed()
}

fn search_term_strategy() -> BoxedStrategy<String> {
    vec(
        prop_oneof![
            Just('c'),
            Just('o'),
            Just('R'),
            Just('i'),
            Just('S'),
            Just('h'),
            Just('e'),
            Just('T'),
            Just(' '),
        ],
        0..=6,
    )
    .prop_map(|chars| chars.into_iter().collect())
    .boxed()
}

fn category_strategy() -> BoxedStrategy<&'static str> {
    prop_oneof![
        Just(CATEGORIES[0]),
        Just(CATEGORIES[1]),
        Just(CATEGORIES[2]),
        Just(CATEGORIES[3]),
    ]
    .boxed()
}

fn filter_click_strategy() -> BoxedStrategy<&'static str> {
    prop_oneof![
        3 => category_strategy(),
        1 => Just("all"),
    ]
    .boxed()
}

fn search_page_html(items: &[String]) -> String {
    let mut html = String::from("<body><input id=\"searchInput\">");
    for (idx, text) in items.iter().enumerate() {
        html.push_str(&format!(
            "<div class=\"searchable-item\" id=\"item-{idx}\">{text}</div>"
        ));
    }
    html.push_str("</body>");
    html
}

fn catalog_page_html(categories: &[&str]) -> String {
    let mut html = String::from("<body><div class=\"filter-group\">");
    html.push_str(
        "<button type=\"button\" class=\"filter-btn active\" id=\"filter-all\" data-filter=\"all\">All</button>",
    );
    for name in CATEGORIES {
        html.push_str(&format!(
            "<button type=\"button\" class=\"filter-btn\" id=\"filter-{name}\" data-filter=\"{name}\">{name}</button>"
        ));
    }
    html.push_str("</div>");
    for (idx, category) in categories.iter().enumerate() {
        html.push_str(&format!(
            "<div class=\"product-card\" id=\"card-{idx}\" data-category=\"{category}\">Product {idx}</div>"
        ));
    }
    html.push_str("</body>");
    html
}

fn fail(message: String) -> proptest::test_runner::TestCaseError {
    proptest::test_runner::TestCaseError::fail(message)
}

fn assert_search_matches_containment(items: &[String], terms: &[String]) -> TestCaseResult {
    let html = search_page_html(items);
    let mut page = Page::from_html(&html).map_err(|err| fail(format!("{err:?}")))?;
    let plan = EnhancementPlan::new(vec![Rule::new("#searchInput", Behavior::LiveSearch)]);
    page.bootstrap(&plan).map_err(|err| fail(format!("{err:?}")))?;

    for term in terms {
        page.type_text("#searchInput", term)
            .map_err(|err| fail(format!("{err:?}")))?;

        for (idx, text) in items.iter().enumerate() {
            let expected = text.to_lowercase().contains(&term.to_lowercase());
            let actual = page
                .is_visible(&format!("#item-{idx}"))
                .map_err(|err| fail(format!("{err:?}")))?;
            prop_assert_eq!(
                actual,
                expected,
                "item {} text={:?} term={:?}",
                idx,
                text,
                term
            );
        }
    }
    Ok(())
}

fn assert_filter_shows_exact_category_matches(
    categories: &[&str],
    clicks: &[&str],
) -> TestCaseResult {
    let html = catalog_page_html(categories);
    let mut page = Page::from_html(&html).map_err(|err| fail(format!("{err:?}")))?;
    let plan = EnhancementPlan::new(vec![Rule::new(".filter-btn", Behavior::CategoryFilter)]);
    page.bootstrap(&plan).map_err(|err| fail(format!("{err:?}")))?;

    for filter in clicks {
        page.click(&format!("#filter-{filter}"))
            .map_err(|err| fail(format!("{err:?}")))?;

        let active = page
            .count(".filter-btn.active")
            .map_err(|err| fail(format!("{err:?}")))?;
        prop_assert_eq!(active, 1, "after clicking {}", filter);

        for (idx, category) in categories.iter().enumerate() {
            let expected = *filter == "all" || category == filter;
            let actual = page
                .is_visible(&format!("#card-{idx}"))
                .map_err(|err| fail(format!("{err:?}")))?;
            prop_assert_eq!(
                actual,
                expected,
                "card {} category={:?} filter={:?}",
                idx,
                category,
                filter
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: filter_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(FILTER_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn live_search_visibility_equals_containment(
        items in vec(item_text_strategy(), 1..=8),
        terms in vec(search_term_strategy(), 1..=6),
    ) {
        assert_search_matches_containment(&items, &terms)?;
    }

    #[test]
    fn category_filter_visibility_equals_exact_match(
        categories in vec(category_strategy(), 1..=10),
        clicks in vec(filter_click_strategy(), 1..=8),
    ) {
        assert_filter_shows_exact_category_matches(&categories, &clicks)?;
    }
}
