use super::context::PromptContext;
use std::fmt::Write;

/// Tables shown in the sample-data section, regardless of how many were sampled.
pub const MAX_SAMPLE_TABLES: usize = 5;

const BANNER: &str = "================================================================================";

/// System message sent alongside the composed prompt.
pub fn system_message(dialect: &str) -> String {
    format!("You are an expert SQL query generator for {dialect} database.")
}

/// Build the user prompt for SQL generation.
///
/// Section order is fixed: schema, sample data, examples, documentation, task,
/// instructions. Examples and documentation only appear when present.
pub fn compose(context: &PromptContext) -> String {
    let dialect = context.dialect.as_str();
    let mut prompt = String::new();

    let _ = writeln!(prompt, "{}\n", system_message(dialect));
    let _ = writeln!(prompt, "{BANNER}");
    prompt.push_str("IMPORTANT: Your goal is to generate SQL that ACTUALLY RETURNS DATA.\n");
    prompt.push_str("A query that is valid but returns no rows because of a wrong literal is a failure.\n");
    let _ = writeln!(prompt, "{BANNER}\n");

    if !context.ddl_statements.is_empty() {
        prompt.push_str("# 1. Database Schema\n\n");
        for ddl in &context.ddl_statements {
            let _ = writeln!(prompt, "{ddl}\n");
        }
    }

    prompt.push_str("# 2. Sample Data (ACTUAL VALUES from database)\n\n");
    prompt.push_str("**CRITICAL**: Use these actual values to understand the data format!\n\n");
    for sample in context
        .samples
        .iter()
        .take(MAX_SAMPLE_TABLES)
        .filter(|s| !s.rows.is_empty())
    {
        let _ = writeln!(prompt, "Table: `{}`", sample.table);
        prompt.push_str("Sample rows:\n");
        for (i, row) in sample.rows.iter().enumerate() {
            let rendered = serde_json::to_string(row).unwrap_or_default();
            let _ = writeln!(prompt, "  Row {}: {}", i + 1, rendered);
        }
        for set in sample.distinct_values.iter().filter(|s| !s.values.is_empty()) {
            let values = serde_json::to_string(&set.values).unwrap_or_default();
            let _ = writeln!(prompt, "\n  Column `{}` contains these ACTUAL values:", set.column);
            let _ = writeln!(prompt, "  {values}");
        }
        prompt.push('\n');
    }

    if !context.examples.is_empty() {
        prompt.push_str("# 3. Example Queries\n\n");
        for example in &context.examples {
            let _ = writeln!(prompt, "Question: {}", example.question);
            let _ = writeln!(prompt, "SQL: {}\n", example.sql);
        }
    }

    if !context.documentation.is_empty() {
        prompt.push_str("# 4. Additional Documentation\n\n");
        for doc in &context.documentation {
            let _ = writeln!(prompt, "{doc}\n");
        }
    }

    prompt.push_str("# 5. Your Task\n\n");
    let _ = writeln!(prompt, "Question: {}\n", context.question);

    prompt.push_str("# 6. Critical Instructions\n\n");
    prompt.push_str("**READ THE SAMPLE DATA ABOVE CAREFULLY!**\n\n");
    prompt.push_str("Rules:\n");
    prompt.push_str("1. Generate ONLY the SQL query, no explanations or comments\n");
    prompt.push_str(
        "2. Quote table/column names that contain non-ASCII characters or reserved words with backticks: `城市`, `省份`\n",
    );
    let _ = writeln!(prompt, "3. The SQL MUST be executable in {dialect} without modification");
    prompt.push_str("4. Do NOT use markdown code blocks (no ```sql)\n");
    prompt.push_str("5. Return ONLY the raw SQL statement\n\n");

    prompt.push_str("**FUZZY MATCHING RULES** (MOST IMPORTANT):\n");
    prompt.push_str("- If the question mentions a location (city/province), CHECK the sample data above\n");
    prompt.push_str("- If sample data shows '广州市' but question asks '广州', use: WHERE column LIKE '%广州%'\n");
    prompt.push_str("- If sample data shows '北京市' but question asks '北京', use: WHERE column LIKE '%北京%'\n");
    prompt.push_str(
        "- ALWAYS use LIKE '%keyword%' for location searches unless you see an EXACT match in sample data\n",
    );
    prompt.push_str("- For numeric comparisons (year, count, etc.), use exact match (=, >, <), never LIKE\n");
    prompt.push_str("- For text searches (names, locations), prefer LIKE '%keyword%' for better recall\n\n");

    prompt.push_str("**EXAMPLES**:\n");
    prompt.push_str("- Question: '来自广州的机构' + Sample data has '广州市' → WHERE `城市` LIKE '%广州%'\n");
    prompt.push_str("- Question: '2022年的数据' → WHERE `年份` = 2022\n");
    prompt.push_str("- Question: '包含科技的公司' → WHERE `公司名` LIKE '%科技%'\n\n");

    prompt.push_str("Now generate the SQL query:\n\n");
    prompt.push_str("SQL:");

    prompt
}
